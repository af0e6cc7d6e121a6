//! Normalization, structural analysis, and the per-host state key.

use fetchkit_core::FetchError;
use url::Url;

/// Structural breakdown of a URL as [`analyze_url`] returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlAnalysis {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
    pub is_secure: bool,
    pub is_local: bool,
    pub domain_segments: Vec<String>,
}

/// Normalizes a URL string: lowercases scheme and host, resolves it
/// against `base` when relative, and collapses `.`/`..` segments. The
/// trailing slash and the original query-parameter order are preserved.
///
/// Normalization is idempotent: normalizing a normalized URL returns it
/// unchanged.
pub fn normalize_url(raw: &str, base: Option<&Url>) -> Result<String, FetchError> {
    let url = match base {
        Some(base) => base.join(raw).map_err(|e| FetchError::InvalidUrl {
            reason: e.to_string(),
        })?,
        None => Url::parse(raw).map_err(|e| FetchError::InvalidUrl {
            reason: e.to_string(),
        })?,
    };
    Ok(url.to_string())
}

/// The unit of per-target state for the rate limiter, circuit breaker,
/// and connection pools: the URL authority as `host:port`, with the
/// scheme's default port filled in so `http://h/` and `http://h:80/`
/// share state.
pub fn host_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Breaks a URL into its parts plus the derived flags the CLI and the
/// engine care about.
pub fn analyze_url(raw: &str) -> Result<UrlAnalysis, FetchError> {
    let url = Url::parse(raw).map_err(|e| FetchError::InvalidUrl {
        reason: e.to_string(),
    })?;

    let host = url.host_str().unwrap_or("").to_string();
    let is_local = match url.host() {
        Some(url::Host::Ipv4(v4)) => super::is_blocked_ip(std::net::IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => super::is_blocked_ip(std::net::IpAddr::V6(v6)),
        Some(url::Host::Domain(d)) => d == "localhost" || d.ends_with(".localhost"),
        None => false,
    };

    Ok(UrlAnalysis {
        scheme: url.scheme().to_string(),
        port: url.port(),
        path: url.path().to_string(),
        query: url.query().map(str::to_string),
        fragment: url.fragment().map(str::to_string),
        is_secure: matches!(url.scheme(), "https" | "ftps"),
        domain_segments: host.split('.').map(str::to_string).collect(),
        host,
        is_local,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host() {
        let n = normalize_url("HTTPS://ExAmPlE.Test/Path/File", None).unwrap();
        assert_eq!(n, "https://example.test/Path/File");
    }

    #[test]
    fn collapses_dot_segments() {
        let n = normalize_url("https://example.test/a/b/../c/./d", None).unwrap();
        assert_eq!(n, "https://example.test/a/c/d");
    }

    #[test]
    fn preserves_trailing_slash_and_query_order() {
        let n = normalize_url("https://example.test/dir/?b=2&a=1", None).unwrap();
        assert_eq!(n, "https://example.test/dir/?b=2&a=1");
    }

    #[test]
    fn resolves_relative_against_base() {
        let base = Url::parse("https://example.test/docs/index.html").unwrap();
        let n = normalize_url("../images/logo.png", Some(&base)).unwrap();
        assert_eq!(n, "https://example.test/images/logo.png");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "HTTP://A.Test/x/../y?q=1#frag",
            "https://example.test/dir/",
            "ftp://Files.Example.Test:2121/pub/file.bin",
        ] {
            let once = normalize_url(raw, None).unwrap();
            let twice = normalize_url(&once, None).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn host_key_fills_default_ports() {
        let a = Url::parse("http://example.test/").unwrap();
        let b = Url::parse("http://example.test:80/").unwrap();
        let c = Url::parse("http://example.test:8080/").unwrap();
        assert_eq!(host_key(&a), "example.test:80");
        assert_eq!(host_key(&a), host_key(&b));
        assert_eq!(host_key(&c), "example.test:8080");
    }

    #[test]
    fn analysis_reports_parts() {
        let a = analyze_url("https://api.example.test:8443/v1/items?x=1#top").unwrap();
        assert_eq!(a.scheme, "https");
        assert_eq!(a.host, "api.example.test");
        assert_eq!(a.port, Some(8443));
        assert_eq!(a.path, "/v1/items");
        assert_eq!(a.query.as_deref(), Some("x=1"));
        assert_eq!(a.fragment.as_deref(), Some("top"));
        assert!(a.is_secure);
        assert!(!a.is_local);
        assert_eq!(a.domain_segments, vec!["api", "example", "test"]);
    }

    #[test]
    fn analysis_flags_local_targets() {
        assert!(analyze_url("http://127.0.0.1/").unwrap().is_local);
        assert!(analyze_url("http://localhost/x").unwrap().is_local);
        assert!(!analyze_url("http://example.test/").unwrap().is_local);
    }
}
