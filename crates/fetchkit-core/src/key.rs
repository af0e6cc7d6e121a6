//! Deterministic request keys for deduplication and caching.

use sha2::{Digest, Sha256};

use crate::request::FetchRequest;

/// Request headers that affect the response body and therefore
/// participate in key derivation. Everything else (tracing headers,
/// user-agent variations) is ignored on purpose.
pub const KEYED_HEADERS: &[&str] = &["accept", "accept-language", "authorization", "content-type", "range"];

/// A lowercase-hex SHA-256 digest identifying a request for the
/// deduplicator and the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    /// Derives the key from method, URL, keyed headers (sorted), params
    /// (sorted), and the body's canonical bytes.
    pub fn for_request(request: &FetchRequest) -> RequestKey {
        let mut hasher = Sha256::new();
        hasher.update(request.method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(request.url.as_str().as_bytes());
        hasher.update(b"\n");

        // headers is a BTreeMap, so iteration is already sorted
        for (name, value) in &request.headers {
            if KEYED_HEADERS.contains(&name.as_str()) {
                hasher.update(name.as_bytes());
                hasher.update(b":");
                hasher.update(value.as_bytes());
                hasher.update(b"\n");
            }
        }

        let mut params: Vec<_> = request.params.clone();
        params.sort();
        for (name, value) in &params {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }

        if let Some(body) = &request.body {
            hasher.update(Sha256::digest(body.canonical_bytes()));
        }

        RequestKey(hex_encode(&hasher.finalize()))
    }

    /// Key for a bare URL plus content-affecting headers, as the cache
    /// uses when no full request is at hand.
    pub fn for_url(url: &str, headers: &[(&str, &str)]) -> RequestKey {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(b"\n");
        let mut sorted: Vec<_> = headers
            .iter()
            .filter(|(name, _)| KEYED_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
            .collect();
        sorted.sort();
        for (name, value) in sorted {
            hasher.update(name.to_ascii_lowercase().as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        RequestKey(hex_encode(&hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_encode(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{FetchRequest, Method, RequestBody};
    use url::Url;

    fn req(url: &str) -> FetchRequest {
        FetchRequest::get(Url::parse(url).unwrap())
    }

    #[test]
    fn identical_requests_share_a_key() {
        let a = RequestKey::for_request(&req("https://example.test/data"));
        let b = RequestKey::for_request(&req("https://example.test/data"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn url_differences_change_the_key() {
        let a = RequestKey::for_request(&req("https://example.test/data"));
        let b = RequestKey::for_request(&req("https://example.test/other"));
        assert_ne!(a, b);
    }

    #[test]
    fn method_changes_the_key() {
        let base = Url::parse("https://example.test/data").unwrap();
        let get = RequestKey::for_request(&FetchRequest::get(base.clone()));
        let post = RequestKey::for_request(
            &FetchRequest::builder(base).method(Method::Post).build(),
        );
        assert_ne!(get, post);
    }

    #[test]
    fn irrelevant_headers_do_not_change_the_key() {
        let base = Url::parse("https://example.test/data").unwrap();
        let plain = RequestKey::for_request(&FetchRequest::get(base.clone()));
        let with_ua = RequestKey::for_request(
            &FetchRequest::builder(base.clone())
                .header("user-agent", "fetchkit")
                .build(),
        );
        let with_accept = RequestKey::for_request(
            &FetchRequest::builder(base)
                .header("accept", "application/json")
                .build(),
        );
        assert_eq!(plain, with_ua);
        assert_ne!(plain, with_accept);
    }

    #[test]
    fn param_order_does_not_change_the_key() {
        let base = Url::parse("https://example.test/data").unwrap();
        let ab = RequestKey::for_request(
            &FetchRequest::builder(base.clone())
                .param("a", "1")
                .param("b", "2")
                .build(),
        );
        let ba = RequestKey::for_request(
            &FetchRequest::builder(base).param("b", "2").param("a", "1").build(),
        );
        assert_eq!(ab, ba);
    }

    #[test]
    fn body_changes_the_key() {
        let base = Url::parse("https://example.test/data").unwrap();
        let empty = RequestKey::for_request(&FetchRequest::get(base.clone()));
        let with_body = RequestKey::for_request(
            &FetchRequest::builder(base)
                .method(Method::Post)
                .body(RequestBody::Text("hello".into()))
                .build(),
        );
        assert_ne!(empty, with_body);
    }
}
