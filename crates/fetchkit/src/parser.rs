//! Content parsers and the seams for external collaborators.
//!
//! The engine ships parsers for text, JSON, and raw bytes; richer
//! formats (HTML, CSV, RSS, PDF, images) register through the same
//! [`ContentParser`] trait from outside the core. Crawler services and
//! credential injection are likewise trait seams the engine invokes
//! but never implements.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fetchkit_content::DetectionHints;
use fetchkit_core::{ContentKind, FetchError, FetchRequest, FetchResult, ParsedContent};
use url::Url;

/// Turns response bytes into a typed value for one [`ContentKind`].
pub trait ContentParser: Send + Sync {
    fn kind(&self) -> ContentKind;
    fn parse(
        &self,
        bytes: &Bytes,
        headers: &BTreeMap<String, String>,
    ) -> Result<ParsedContent, FetchError>;
}

/// Strict UTF-8 text.
pub struct TextParser;

impl ContentParser for TextParser {
    fn kind(&self) -> ContentKind {
        ContentKind::Text
    }

    fn parse(
        &self,
        bytes: &Bytes,
        _headers: &BTreeMap<String, String>,
    ) -> Result<ParsedContent, FetchError> {
        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(ParsedContent::Text(text.to_string())),
            Err(e) => Err(FetchError::Content {
                message: format!("body is not valid UTF-8: {e}"),
            }),
        }
    }
}

/// JSON via serde.
pub struct JsonParser;

impl ContentParser for JsonParser {
    fn kind(&self) -> ContentKind {
        ContentKind::Json
    }

    fn parse(
        &self,
        bytes: &Bytes,
        _headers: &BTreeMap<String, String>,
    ) -> Result<ParsedContent, FetchError> {
        serde_json::from_slice(bytes)
            .map(ParsedContent::Json)
            .map_err(|e| FetchError::Content {
                message: format!("invalid JSON: {e}"),
            })
    }
}

/// Bytes, untouched.
pub struct RawParser;

impl ContentParser for RawParser {
    fn kind(&self) -> ContentKind {
        ContentKind::Raw
    }

    fn parse(
        &self,
        bytes: &Bytes,
        _headers: &BTreeMap<String, String>,
    ) -> Result<ParsedContent, FetchError> {
        Ok(ParsedContent::Bytes(bytes.clone()))
    }
}

/// Parser registry keyed by kind, with auto-detection when no kind is
/// requested.
pub struct ParserRegistry {
    parsers: HashMap<ContentKind, Arc<dyn ContentParser>>,
}

impl ParserRegistry {
    /// Registry with the built-in text/JSON/raw parsers.
    pub fn with_defaults() -> ParserRegistry {
        let mut registry = ParserRegistry {
            parsers: HashMap::new(),
        };
        registry.register(Arc::new(TextParser));
        registry.register(Arc::new(JsonParser));
        registry.register(Arc::new(RawParser));
        registry
    }

    /// Registers (or replaces) the parser for its kind.
    pub fn register(&mut self, parser: Arc<dyn ContentParser>) {
        self.parsers.insert(parser.kind(), parser);
    }

    /// Parses `bytes`, honoring the requested kind or auto-detecting
    /// one. Kinds with no registered parser degrade: text-shaped kinds
    /// parse as text, binary-shaped ones as raw bytes.
    pub fn parse(
        &self,
        bytes: &Bytes,
        requested: Option<ContentKind>,
        headers: &BTreeMap<String, String>,
        url: Option<&Url>,
    ) -> Result<(ParsedContent, ContentKind), FetchError> {
        let kind = requested.unwrap_or_else(|| {
            let hints = DetectionHints {
                mime: headers.get("content-type").map(String::as_str),
                url,
                filename: None,
            };
            fetchkit_content::detect(bytes, &hints).kind
        });

        let parser = self.parsers.get(&kind).cloned().or_else(|| {
            let fallback = match kind {
                ContentKind::Html
                | ContentKind::Xml
                | ContentKind::Rss
                | ContentKind::Csv
                | ContentKind::Markdown => ContentKind::Text,
                ContentKind::Pdf | ContentKind::Image => ContentKind::Raw,
                _ => ContentKind::Raw,
            };
            self.parsers.get(&fallback).cloned()
        });

        match parser {
            Some(parser) => Ok((parser.parse(bytes, headers)?, kind)),
            None => Ok((ParsedContent::Bytes(bytes.clone()), kind)),
        }
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// An opaque fetch backend (crawler service, JS renderer). The engine
/// routes requests to one by name when asked; it never implements one.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError>;
}

/// Injects credentials into a prepared request (OAuth2 bearer, API
/// key header, ...). Runs before dedup/cache key derivation so keyed
/// headers reflect the credentials actually sent.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn apply(&self, request: &mut FetchRequest) -> Result<(), FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_headers() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn json_parses_to_a_value() {
        let registry = ParserRegistry::with_defaults();
        let (content, kind) = registry
            .parse(
                &Bytes::from_static(br#"{"ok":true}"#),
                Some(ContentKind::Json),
                &no_headers(),
                None,
            )
            .unwrap();
        assert_eq!(kind, ContentKind::Json);
        assert_eq!(content.as_json().unwrap()["ok"], true);
    }

    #[test]
    fn bad_json_is_a_content_error() {
        let registry = ParserRegistry::with_defaults();
        let err = registry
            .parse(
                &Bytes::from_static(b"{nope"),
                Some(ContentKind::Json),
                &no_headers(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, FetchError::Content { .. }));
    }

    #[test]
    fn detection_kicks_in_without_a_requested_kind() {
        let registry = ParserRegistry::with_defaults();
        let mut headers = no_headers();
        headers.insert(
            "content-type".to_string(),
            "application/json".to_string(),
        );
        let (content, kind) = registry
            .parse(&Bytes::from_static(br#"[1,2,3]"#), None, &headers, None)
            .unwrap();
        assert_eq!(kind, ContentKind::Json);
        assert!(content.as_json().is_some());
    }

    #[test]
    fn unregistered_kinds_degrade_sensibly() {
        let registry = ParserRegistry::with_defaults();
        let (content, kind) = registry
            .parse(
                &Bytes::from_static(b"<html><body>hi</body></html>"),
                Some(ContentKind::Html),
                &no_headers(),
                None,
            )
            .unwrap();
        assert_eq!(kind, ContentKind::Html);
        assert!(content.as_text().is_some());

        let (content, kind) = registry
            .parse(
                &Bytes::from_static(b"%PDF-1.7"),
                Some(ContentKind::Pdf),
                &no_headers(),
                None,
            )
            .unwrap();
        assert_eq!(kind, ContentKind::Pdf);
        assert!(content.as_bytes().is_some());
    }

    #[test]
    fn custom_parsers_take_over_their_kind() {
        struct UpperHtml;
        impl ContentParser for UpperHtml {
            fn kind(&self) -> ContentKind {
                ContentKind::Html
            }
            fn parse(
                &self,
                bytes: &Bytes,
                _headers: &BTreeMap<String, String>,
            ) -> Result<ParsedContent, FetchError> {
                Ok(ParsedContent::Text(
                    String::from_utf8_lossy(bytes).to_uppercase(),
                ))
            }
        }

        let mut registry = ParserRegistry::with_defaults();
        registry.register(Arc::new(UpperHtml));
        let (content, _) = registry
            .parse(
                &Bytes::from_static(b"<p>hi</p>"),
                Some(ContentKind::Html),
                &no_headers(),
                None,
            )
            .unwrap();
        assert_eq!(content.as_text(), Some("<P>HI</P>"));
    }
}
