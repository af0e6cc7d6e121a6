//! Result rendering for the CLI.

use colored::Colorize;
use fetchkit::{BatchResult, FetchResult, ParsedContent};

use crate::args::OutputFormat;

/// Renders one result for stdout in the chosen format.
pub fn render_result(result: &FetchResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => render_text(result),
        OutputFormat::Json => render_json(result).to_string(),
        OutputFormat::Detailed => render_detailed(result),
        OutputFormat::Summary => render_summary_line(result),
    }
}

fn render_text(result: &FetchResult) -> String {
    match (&result.error, &result.content) {
        (Some(err), _) => format!("{}: {err}", result.url),
        (None, Some(ParsedContent::Text(text))) => text.clone(),
        (None, Some(ParsedContent::Json(value))) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        (None, Some(ParsedContent::Bytes(bytes))) => {
            format!("<{} bytes of {}>", bytes.len(), result.content_kind_name())
        }
        (None, None) => String::new(),
    }
}

fn render_json(result: &FetchResult) -> serde_json::Value {
    let content = match &result.content {
        Some(ParsedContent::Json(value)) => value.clone(),
        Some(ParsedContent::Text(text)) => serde_json::Value::String(text.clone()),
        Some(ParsedContent::Bytes(bytes)) => {
            serde_json::json!({ "bytes": bytes.len() })
        }
        None => serde_json::Value::Null,
    };
    serde_json::json!({
        "url": result.url,
        "status": result.status,
        "success": result.is_success(),
        "error": result.error.as_ref().map(|e| e.to_string()),
        "error_category": result.error.as_ref().map(|e| e.category().to_string()),
        "retry_count": result.retry_count,
        "from_cache": result.from_cache,
        "response_time_ms": result.response_time.as_millis(),
        "content_type": result.content_kind.map(|k| k.to_string()),
        "content": content,
    })
}

fn render_detailed(result: &FetchResult) -> String {
    let mut out = String::new();
    let status = if result.is_success() {
        format!("{}", result.status).green()
    } else {
        format!("{}", result.status).red()
    };
    out.push_str(&format!("{} {}\n", status, result.url.bold()));
    out.push_str(&format!(
        "  time: {:?}  retries: {}  cache: {}\n",
        result.response_time,
        result.retry_count,
        if result.from_cache { "hit" } else { "miss" }
    ));
    if let Some(kind) = result.content_kind {
        out.push_str(&format!("  content-type: {kind}\n"));
    }
    for (name, value) in &result.headers {
        out.push_str(&format!("  {name}: {value}\n"));
    }
    if let Some(err) = &result.error {
        out.push_str(&format!("  error: {}\n", err.to_string().red()));
    }
    out.push_str(&render_text(result));
    out
}

fn render_summary_line(result: &FetchResult) -> String {
    let marker = if result.is_success() {
        "ok".green()
    } else {
        "failed".red()
    };
    format!(
        "{marker} {} status={} retries={} time={:?}",
        result.url, result.status, result.retry_count, result.response_time
    )
}

/// One-line stderr summary for a failed URL.
pub fn failure_line(result: &FetchResult) -> String {
    let reason = result
        .error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| format!("HTTP {}", result.status));
    format!("{}: {}", result.url.red(), reason)
}

/// The batch trailer: totals and success rate.
pub fn batch_summary(batch: &BatchResult) -> String {
    format!(
        "{} total, {} succeeded, {} failed ({:.1}% success) in {:?}",
        batch.total,
        batch.successful.to_string().green(),
        batch.failed.to_string().red(),
        batch.success_rate() * 100.0,
        batch.duration
    )
}

trait ContentKindName {
    fn content_kind_name(&self) -> String;
}

impl ContentKindName for FetchResult {
    fn content_kind_name(&self) -> String {
        self.content_kind
            .map(|k| k.to_string())
            .unwrap_or_else(|| "raw".to_string())
    }
}
