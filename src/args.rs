//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Detailed,
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CrawlerOperation {
    Scrape,
    Crawl,
    Search,
}

/// Resilient HTTP/FTP content fetcher.
#[derive(Debug, Parser)]
#[command(name = "fetchkit", version, about)]
pub struct Cli {
    /// URLs to fetch.
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// File with one URL per line; `#` starts a comment.
    #[arg(long, value_name = "FILE")]
    pub batch: Option<PathBuf>,

    /// Parse mode (text, json, html, raw, ...).
    #[arg(short = 't', long, value_name = "KIND")]
    pub content_type: Option<String>,

    /// HTTP method.
    #[arg(long, default_value = "GET")]
    pub method: String,

    /// Request header, `'Name: value'`. Repeatable.
    #[arg(long = "headers", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Request body.
    #[arg(long, value_name = "BODY")]
    pub data: Option<String>,

    /// Total timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Retries per request.
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Concurrent request budget.
    #[arg(long, value_name = "N")]
    pub concurrent: Option<usize>,

    /// Enable the response cache.
    #[arg(long)]
    pub cache: bool,

    /// Cache TTL in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub cache_ttl: Option<u64>,

    /// Stream the response to disk instead of parsing it.
    #[arg(long)]
    pub stream: bool,

    /// Output path for streamed downloads.
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Show a progress indicator on stderr.
    #[arg(long)]
    pub progress: bool,

    /// Initial chunk size in bytes for streaming.
    #[arg(long, value_name = "N")]
    pub chunk_size: Option<usize>,

    /// Abort streamed downloads larger than this.
    #[arg(long, value_name = "N")]
    pub max_file_size: Option<u64>,

    /// Validate the URLs and print the verdicts, without fetching.
    #[arg(long)]
    pub validate_urls: bool,

    /// Normalize the URLs and print them, without fetching.
    #[arg(long)]
    pub normalize_urls: bool,

    /// Route through a registered crawler backend.
    #[arg(long)]
    pub use_crawler: bool,

    /// Crawler backend name.
    #[arg(long, value_name = "NAME")]
    pub crawler_type: Option<String>,

    #[arg(long, value_enum, default_value = "scrape")]
    pub crawler_operation: CrawlerOperation,

    /// Page budget for crawl operations.
    #[arg(long, value_name = "N")]
    pub max_pages: Option<u32>,

    /// Query for crawler search operations.
    #[arg(long, value_name = "STR")]
    pub search_query: Option<String>,

    /// Skip TLS certificate verification.
    #[arg(long)]
    pub no_verify_ssl: bool,

    /// Admit loopback/private targets (test servers).
    #[arg(long)]
    pub allow_private: bool,

    #[arg(short, long)]
    pub verbose: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Splits one `'Name: value'` argument.
pub fn parse_header(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Reads a batch file: one URL per non-empty, non-comment line.
pub fn parse_batch_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn header_parsing() {
        assert_eq!(
            parse_header("Accept: application/json"),
            Some(("Accept".to_string(), "application/json".to_string()))
        );
        assert_eq!(
            parse_header("X-Empty:"),
            Some(("X-Empty".to_string(), String::new()))
        );
        assert_eq!(parse_header("no-colon"), None);
        assert_eq!(parse_header(": value"), None);
    }

    #[test]
    fn batch_files_skip_comments_and_blanks() {
        let urls = parse_batch_file(
            "https://a.test/\n\n# comment\n  https://b.test/path  \n#another\n",
        );
        assert_eq!(urls, vec!["https://a.test/", "https://b.test/path"]);
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from([
            "fetchkit",
            "https://example.test/",
            "-t",
            "json",
            "--method",
            "POST",
            "--headers",
            "Accept: application/json",
            "--retries",
            "2",
            "--concurrent",
            "8",
            "--cache",
            "--cache-ttl",
            "120",
            "--format",
            "json",
        ]);
        assert_eq!(cli.urls, vec!["https://example.test/"]);
        assert_eq!(cli.content_type.as_deref(), Some("json"));
        assert_eq!(cli.method, "POST");
        assert_eq!(cli.retries, Some(2));
        assert_eq!(cli.concurrent, Some(8));
        assert!(cli.cache);
        assert_eq!(cli.cache_ttl, Some(120));
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
