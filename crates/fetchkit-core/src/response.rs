//! Fetch results and parsed content.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::FetchError;
use crate::request::ContentKind;

/// Body after parsing. `Bytes` is the raw fallback and what downloads
/// and unparseable payloads carry.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedContent {
    Text(String),
    Json(serde_json::Value),
    Bytes(Bytes),
}

impl ParsedContent {
    pub fn len(&self) -> usize {
        match self {
            ParsedContent::Text(s) => s.len(),
            ParsedContent::Json(v) => v.to_string().len(),
            ParsedContent::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParsedContent::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ParsedContent::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ParsedContent::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// The immutable outcome of one fetch, success or failure.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Final URL after redirects.
    pub url: String,
    /// HTTP status, or the FTP reply code mapped onto HTTP-ish space
    /// (200 success, 550 not found, 530 auth).
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub content: Option<ParsedContent>,
    pub response_time: Duration,
    pub timestamp: DateTime<Utc>,
    pub error: Option<FetchError>,
    pub retry_count: u32,
    pub from_cache: bool,
    pub content_kind: Option<ContentKind>,
}

impl FetchResult {
    /// A successful result skeleton; callers fill in content and kind.
    pub fn success(url: impl Into<String>, status: u16, response_time: Duration) -> FetchResult {
        FetchResult {
            url: url.into(),
            status,
            headers: BTreeMap::new(),
            content: None,
            response_time,
            timestamp: Utc::now(),
            error: None,
            retry_count: 0,
            from_cache: false,
            content_kind: None,
        }
    }

    /// A failed result carrying `error`. Status is taken from the error
    /// when it maps to one, 0 otherwise.
    pub fn failure(url: impl Into<String>, error: FetchError, response_time: Duration) -> FetchResult {
        FetchResult {
            url: url.into(),
            status: error.status().unwrap_or(0),
            headers: BTreeMap::new(),
            content: None,
            response_time,
            timestamp: Utc::now(),
            error: Some(error),
            retry_count: 0,
            from_cache: false,
            content_kind: None,
        }
    }

    /// `true` iff no error is recorded and the status is in the success
    /// range (2xx for HTTP, exactly 200 for the mapped FTP codes).
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    pub fn with_retry_count(mut self, retries: u32) -> FetchResult {
        self.retry_count = retries;
        self
    }

    pub fn mark_cached(mut self) -> FetchResult {
        self.from_cache = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_invariant() {
        let ok = FetchResult::success("https://example.test/", 200, Duration::from_millis(5));
        assert!(ok.is_success());

        let redirectish = FetchResult::success("https://example.test/", 301, Duration::ZERO);
        assert!(!redirectish.is_success());

        let failed = FetchResult::failure(
            "https://example.test/",
            FetchError::Server { status: 503 },
            Duration::ZERO,
        );
        assert!(!failed.is_success());
        assert_eq!(failed.status, 503);
    }

    #[test]
    fn failure_without_status_reports_zero() {
        let failed = FetchResult::failure(
            "https://example.test/",
            FetchError::Cancelled,
            Duration::ZERO,
        );
        assert_eq!(failed.status, 0);
        assert!(!failed.is_success());
    }

    #[test]
    fn parsed_content_accessors() {
        let text = ParsedContent::Text("hi".into());
        assert_eq!(text.as_text(), Some("hi"));
        assert!(text.as_json().is_none());
        assert_eq!(text.len(), 2);

        let json = ParsedContent::Json(serde_json::json!({"ok": true}));
        assert!(json.as_json().is_some());
    }
}
