//! Textual pattern analysis and the binary heuristic.

use fetchkit_core::ContentKind;

/// Sample size for the binary heuristic.
const SAMPLE_LEN: usize = 1024;

/// A buffer is binary iff a 1 KiB sample contains any NUL byte or more
/// than 30% non-printable bytes (tab, LF, and CR excluded from the
/// count).
pub fn is_binary(buffer: &[u8]) -> bool {
    let sample = &buffer[..buffer.len().min(SAMPLE_LEN)];
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let non_printable = sample
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
        .count();
    (non_printable as f64) / (sample.len() as f64) > 0.30
}

/// Inspects the text itself: well-formed JSON, HTML/XML/RSS markers,
/// CSV shape, Markdown markers. Returns the kind and a confidence.
pub fn detect_textual(buffer: &[u8]) -> Option<(ContentKind, f64)> {
    if is_binary(buffer) {
        return None;
    }
    let text = std::str::from_utf8(buffer).ok()?;
    let trimmed = text.trim_start();

    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(text).is_ok()
    {
        return Some((ContentKind::Json, 0.9));
    }

    let lower_head: String = trimmed.chars().take(512).collect::<String>().to_ascii_lowercase();
    if lower_head.contains("<rss") || lower_head.contains("<feed") {
        return Some((ContentKind::Rss, 0.8));
    }
    if lower_head.starts_with("<!doctype html") || lower_head.contains("<html") {
        return Some((ContentKind::Html, 0.8));
    }
    if lower_head.starts_with("<?xml") || trimmed.starts_with('<') {
        return Some((ContentKind::Xml, 0.6));
    }

    if looks_like_csv(text) {
        return Some((ContentKind::Csv, 0.5));
    }
    if looks_like_markdown(text) {
        return Some((ContentKind::Markdown, 0.5));
    }

    Some((ContentKind::Text, 0.3))
}

/// At least two lines with a consistent comma count above zero.
fn looks_like_csv(text: &str) -> bool {
    let counts: Vec<usize> = text
        .lines()
        .take(5)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.matches(',').count())
        .collect();
    counts.len() >= 2 && counts[0] > 0 && counts.iter().all(|&c| c == counts[0])
}

fn looks_like_markdown(text: &str) -> bool {
    text.lines().take(20).any(|line| {
        let t = line.trim_start();
        t.starts_with("# ")
            || t.starts_with("## ")
            || t.starts_with("```")
            || t.starts_with("- [")
            || t.starts_with("* ")
    })
}
