//! Magic-byte signatures.

use fetchkit_core::ContentKind;

/// (prefix, kind). Longest prefixes first so `GIF89a` wins over `GIF`.
const SIGNATURES: &[(&[u8], ContentKind)] = &[
    (b"\x89PNG\r\n\x1a\n", ContentKind::Image),
    (b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1", ContentKind::Raw), // legacy MS Office
    (b"GIF87a", ContentKind::Image),
    (b"GIF89a", ContentKind::Image),
    (b"%PDF", ContentKind::Pdf),
    (b"RIFF", ContentKind::Image), // WebP family
    (b"PK\x03\x04", ContentKind::Raw), // ZIP
    (b"Rar!", ContentKind::Raw),
    (b"\xff\xd8\xff", ContentKind::Image), // JPEG
    (b"\x1f\x8b", ContentKind::Raw),       // gzip
    (b"BM", ContentKind::Image),
];

/// Classifies by file signature; `None` when no prefix matches.
pub fn detect_signature(buffer: &[u8]) -> Option<ContentKind> {
    SIGNATURES
        .iter()
        .find(|(prefix, _)| buffer.starts_with(prefix))
        .map(|(_, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_common_signatures() {
        assert_eq!(detect_signature(b"%PDF-1.4"), Some(ContentKind::Pdf));
        assert_eq!(
            detect_signature(b"\x89PNG\r\n\x1a\n...."),
            Some(ContentKind::Image)
        );
        assert_eq!(detect_signature(b"\xff\xd8\xff\xe0"), Some(ContentKind::Image));
        assert_eq!(detect_signature(b"GIF89a;"), Some(ContentKind::Image));
        assert_eq!(detect_signature(b"PK\x03\x04zipfile"), Some(ContentKind::Raw));
        assert_eq!(detect_signature(b"\x1f\x8b\x08"), Some(ContentKind::Raw));
    }

    #[test]
    fn unknown_prefixes_yield_none() {
        assert_eq!(detect_signature(b"hello world"), None);
        assert_eq!(detect_signature(b""), None);
    }
}
