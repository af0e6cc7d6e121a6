//! Content-type detection.
//!
//! Classifies a byte buffer by combining independent sources, each
//! voting with a confidence in `[0, 1]`: file signature (weight 1.0),
//! the HTTP `Content-Type` header (0.8), the URL extension (0.6), an
//! explicit filename extension (0.6), and textual pattern analysis
//! (0.4). The kind with the highest weighted score wins; ties break
//! toward the higher-confidence source.

mod signatures;
mod textual;

use fetchkit_core::ContentKind;
use url::Url;

pub use signatures::detect_signature;
pub use textual::{detect_textual, is_binary};

/// Where a classification vote came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionSource {
    Signature,
    MimeHeader,
    UrlExtension,
    FilenameExtension,
    TextualAnalysis,
}

impl DetectionSource {
    /// Fixed per-source weight applied to the vote's confidence.
    pub fn weight(&self) -> f64 {
        match self {
            DetectionSource::Signature => 1.0,
            DetectionSource::MimeHeader => 0.8,
            DetectionSource::UrlExtension => 0.6,
            DetectionSource::FilenameExtension => 0.6,
            DetectionSource::TextualAnalysis => 0.4,
        }
    }
}

/// One source's vote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vote {
    pub kind: ContentKind,
    pub confidence: f64,
    pub source: DetectionSource,
}

/// The detector's combined verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub kind: ContentKind,
    /// Weighted score of the winning kind.
    pub score: f64,
    /// The individual votes that were cast, for diagnostics.
    pub votes: Vec<Vote>,
}

/// Inputs the detector may consult besides the bytes themselves.
#[derive(Debug, Clone, Default)]
pub struct DetectionHints<'a> {
    /// Value of the `Content-Type` response header, if any.
    pub mime: Option<&'a str>,
    /// The request URL, for its path extension.
    pub url: Option<&'a Url>,
    /// An explicit filename (e.g. from `Content-Disposition`).
    pub filename: Option<&'a str>,
}

/// Classifies `buffer` using every available source.
///
/// Falls back to `Raw` for binary buffers nothing recognizes, and
/// `Text` for textual buffers nothing recognizes.
pub fn detect(buffer: &[u8], hints: &DetectionHints<'_>) -> Detection {
    let mut votes = Vec::new();

    if let Some(kind) = detect_signature(buffer) {
        votes.push(Vote {
            kind,
            confidence: 1.0,
            source: DetectionSource::Signature,
        });
    }

    if let Some(mime) = hints.mime {
        if let Some((kind, confidence)) = detect_mime(mime) {
            votes.push(Vote {
                kind,
                confidence,
                source: DetectionSource::MimeHeader,
            });
        }
    }

    if let Some(url) = hints.url {
        if let Some(kind) = detect_extension(url.path()) {
            votes.push(Vote {
                kind,
                confidence: 1.0,
                source: DetectionSource::UrlExtension,
            });
        }
    }

    if let Some(name) = hints.filename {
        if let Some(kind) = detect_extension(name) {
            votes.push(Vote {
                kind,
                confidence: 1.0,
                source: DetectionSource::FilenameExtension,
            });
        }
    }

    if let Some((kind, confidence)) = detect_textual(buffer) {
        votes.push(Vote {
            kind,
            confidence,
            source: DetectionSource::TextualAnalysis,
        });
    }

    let winner = pick_winner(&votes);
    match winner {
        Some((kind, score)) => Detection { kind, score, votes },
        None => Detection {
            kind: if is_binary(buffer) {
                ContentKind::Raw
            } else {
                ContentKind::Text
            },
            score: 0.0,
            votes,
        },
    }
}

/// Sums weighted confidences per kind and returns the best, breaking
/// ties toward the single highest-confidence vote.
fn pick_winner(votes: &[Vote]) -> Option<(ContentKind, f64)> {
    let mut scores: Vec<(ContentKind, f64, f64)> = Vec::new();
    for vote in votes {
        let weighted = vote.confidence * vote.source.weight();
        match scores.iter_mut().find(|(k, _, _)| *k == vote.kind) {
            Some((_, score, best)) => {
                *score += weighted;
                if vote.confidence > *best {
                    *best = vote.confidence;
                }
            }
            None => scores.push((vote.kind, weighted, vote.confidence)),
        }
    }
    scores
        .into_iter()
        .max_by(|a, b| {
            (a.1, a.2)
                .partial_cmp(&(b.1, b.2))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(kind, score, _)| (kind, score))
}

/// Maps a `Content-Type` header value onto a kind.
fn detect_mime(mime: &str) -> Option<(ContentKind, f64)> {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    let kind = match essence.as_str() {
        "text/plain" | "text/css" | "text/javascript" | "application/javascript"
        | "application/ecmascript" => ContentKind::Text,
        "text/html" | "application/xhtml+xml" => ContentKind::Html,
        "application/json" | "application/ld+json" | "application/hal+json"
        | "application/vnd.api+json" => ContentKind::Json,
        "text/xml" | "application/xml" => ContentKind::Xml,
        "application/rss+xml" | "application/atom+xml" | "application/feed+json" => {
            ContentKind::Rss
        }
        "text/csv" | "application/csv" => ContentKind::Csv,
        "text/markdown" => ContentKind::Markdown,
        "application/pdf" => ContentKind::Pdf,
        "application/octet-stream" => ContentKind::Raw,
        _ if essence.starts_with("image/") => ContentKind::Image,
        _ if essence.starts_with("text/") => ContentKind::Text,
        _ => return None,
    };
    Some((kind, 1.0))
}

/// Maps a path/filename extension onto a kind.
fn detect_extension(path: &str) -> Option<ContentKind> {
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" | "text" | "log" => Some(ContentKind::Text),
        "html" | "htm" => Some(ContentKind::Html),
        "json" => Some(ContentKind::Json),
        "xml" => Some(ContentKind::Xml),
        "rss" | "atom" | "feed" => Some(ContentKind::Rss),
        "csv" | "tsv" => Some(ContentKind::Csv),
        "md" | "markdown" => Some(ContentKind::Markdown),
        "pdf" => Some(ContentKind::Pdf),
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tiff" | "svg" | "ico" => {
            Some(ContentKind::Image)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_beats_extension() {
        // PDF bytes served from a ".txt" URL: signature outweighs it.
        let url = Url::parse("https://example.test/report.txt").unwrap();
        let detection = detect(
            b"%PDF-1.7 rest of document",
            &DetectionHints {
                url: Some(&url),
                ..Default::default()
            },
        );
        assert_eq!(detection.kind, ContentKind::Pdf);
    }

    #[test]
    fn mime_and_content_agree_on_json() {
        let detection = detect(
            br#"{"ok": true}"#,
            &DetectionHints {
                mime: Some("application/json; charset=utf-8"),
                ..Default::default()
            },
        );
        assert_eq!(detection.kind, ContentKind::Json);
    }

    #[test]
    fn url_extension_alone_is_enough() {
        let url = Url::parse("https://example.test/feed.rss").unwrap();
        let detection = detect(
            b"<?xml version=\"1.0\"?><rss version=\"2.0\"></rss>",
            &DetectionHints {
                url: Some(&url),
                ..Default::default()
            },
        );
        assert_eq!(detection.kind, ContentKind::Rss);
    }

    #[test]
    fn unknown_binary_falls_back_to_raw() {
        let buffer: Vec<u8> = (0..255u8).cycle().take(2048).collect();
        let detection = detect(&buffer, &DetectionHints::default());
        assert_eq!(detection.kind, ContentKind::Raw);
    }

    #[test]
    fn unknown_text_falls_back_to_text() {
        let detection = detect(b"just some words", &DetectionHints::default());
        assert_eq!(detection.kind, ContentKind::Text);
    }

    #[test]
    fn filename_hint_is_consulted() {
        let detection = detect(
            b"a,b,c\n1,2,3\n",
            &DetectionHints {
                filename: Some("export.csv"),
                ..Default::default()
            },
        );
        assert_eq!(detection.kind, ContentKind::Csv);
    }
}
