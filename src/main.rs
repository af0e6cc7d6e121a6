//! fetchkit command-line front-end.

mod args;
mod output;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use url::Url;

use fetchkit::{
    analyze_url, normalize_url, CacheConfig, ContentKind, FetchRequest, Fetcher, FetcherConfig,
    Method, ProgressCallback, ProgressInfo, RequestBody, RetryConfig, ValidatorConfig,
};

use args::{Cli, OutputFormat};

const EXIT_FAILURES: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        code = run(cli) => code,
    }
}

async fn run(cli: Cli) -> ExitCode {
    let urls = match gather_urls(&cli).await {
        Ok(urls) => urls,
        Err(message) => {
            eprintln!("{}", message.red());
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if urls.is_empty() {
        eprintln!("{}", "no URLs given (positional or --batch FILE)".red());
        return ExitCode::from(EXIT_CONFIG);
    }

    if cli.validate_urls || cli.normalize_urls {
        return inspect_urls(&cli, &urls);
    }

    if cli.use_crawler {
        return crawler_unavailable(&cli);
    }

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{}", message.red());
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let fetcher = match Fetcher::new(config) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(err) => {
            eprintln!("{}", format!("failed to initialize engine: {err}").red());
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let maintenance = fetcher.spawn_maintenance();

    let code = if cli.stream {
        stream_urls(&cli, &fetcher, &urls).await
    } else {
        fetch_urls(&cli, &fetcher, &urls).await
    };

    for handle in maintenance {
        handle.abort();
    }
    code
}

async fn gather_urls(cli: &Cli) -> Result<Vec<String>, String> {
    let mut urls = cli.urls.clone();
    if let Some(path) = &cli.batch {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("cannot read batch file {}: {e}", path.display()))?;
        urls.extend(args::parse_batch_file(&content));
    }
    Ok(urls)
}

fn inspect_urls(cli: &Cli, urls: &[String]) -> ExitCode {
    let validator = fetchkit_url::UrlValidator::new(validator_config(cli));
    let mut bad = 0usize;
    for raw in urls {
        if cli.normalize_urls {
            match normalize_url(raw, None) {
                Ok(normalized) => println!("{normalized}"),
                Err(err) => {
                    bad += 1;
                    eprintln!("{}", format!("{raw}: {err}").red());
                }
            }
            continue;
        }
        match validator.validate(raw).and_then(|_| analyze_url(raw)) {
            Ok(analysis) => {
                println!(
                    "{} {} host={} secure={} local={}",
                    "valid".green(),
                    raw,
                    analysis.host,
                    analysis.is_secure,
                    analysis.is_local
                );
            }
            Err(err) => {
                bad += 1;
                println!("{} {raw}: {err}", "invalid".red());
            }
        }
    }
    if bad == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_CONFIG)
    }
}

fn crawler_unavailable(cli: &Cli) -> ExitCode {
    let keys: Vec<&str> = ["FIRECRAWL_API_KEY", "SPIDER_API_KEY", "TAVILY_API_KEY"]
        .into_iter()
        .filter(|key| std::env::var(key).is_ok())
        .collect();
    let backend = cli.crawler_type.as_deref().unwrap_or("<default>");
    eprintln!(
        "{}",
        format!(
            "crawler backend '{backend}' is not registered in this build \
             (detected credentials: {})",
            if keys.is_empty() {
                "none".to_string()
            } else {
                keys.join(", ")
            }
        )
        .red()
    );
    ExitCode::from(EXIT_CONFIG)
}

fn validator_config(cli: &Cli) -> ValidatorConfig {
    if cli.allow_private {
        ValidatorConfig::permissive()
    } else {
        ValidatorConfig::default()
    }
}

fn build_config(cli: &Cli) -> Result<FetcherConfig, String> {
    let mut builder = FetcherConfig::builder().validator(validator_config(cli));

    if let Some(retries) = cli.retries {
        builder = builder.retry(RetryConfig::builder().max_retries(retries).build_config());
    }
    if let Some(concurrent) = cli.concurrent {
        builder = builder.max_concurrent_requests(concurrent);
    }
    if let Some(timeout) = cli.timeout {
        if timeout <= 0.0 {
            return Err("--timeout must be positive".to_string());
        }
        builder = builder.total_timeout(Duration::from_secs_f64(timeout));
    }
    if cli.cache {
        builder = builder.cache(CacheConfig::default());
        if let Some(ttl) = cli.cache_ttl {
            builder = builder.cache_ttl(Duration::from_secs(ttl));
        }
    }

    let mut config = builder.build();
    config.http.verify_ssl = !cli.no_verify_ssl;
    config.http.screen_resolved_ips = !cli.allow_private;
    if let Some(chunk) = cli.chunk_size {
        config.stream.chunk_size = chunk;
    }
    config.stream.max_file_size = cli.max_file_size;
    Ok(config)
}

fn build_requests(cli: &Cli, urls: &[String]) -> Result<Vec<FetchRequest>, String> {
    let method = Method::parse(&cli.method)
        .ok_or_else(|| format!("unsupported method '{}'", cli.method))?;
    let kind = match &cli.content_type {
        Some(raw) => Some(
            ContentKind::parse(raw).ok_or_else(|| format!("unsupported content type '{raw}'"))?,
        ),
        None => None,
    };
    let mut headers = Vec::new();
    for raw in &cli.headers {
        let parsed =
            args::parse_header(raw).ok_or_else(|| format!("malformed header '{raw}'"))?;
        headers.push(parsed);
    }

    let mut requests = Vec::with_capacity(urls.len());
    for raw in urls {
        let url = Url::parse(raw).map_err(|e| format!("invalid URL '{raw}': {e}"))?;
        let mut builder = FetchRequest::builder(url)
            .method(method)
            .headers(headers.iter().cloned());
        if let Some(kind) = kind {
            builder = builder.content_type(kind);
        }
        if let Some(body) = &cli.data {
            builder = builder.body(RequestBody::Text(body.clone()));
        }
        if let Some(timeout) = cli.timeout {
            builder = builder.timeout(Duration::from_secs_f64(timeout));
        }
        if let Some(output) = &cli.output {
            builder = builder.output_path(output.clone());
        }
        requests.push(builder.build());
    }
    Ok(requests)
}

async fn fetch_urls(cli: &Cli, fetcher: &Arc<Fetcher>, urls: &[String]) -> ExitCode {
    let requests = match build_requests(cli, urls) {
        Ok(requests) => requests,
        Err(message) => {
            eprintln!("{}", message.red());
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let bar = if cli.progress && requests.len() > 1 {
        let bar = ProgressBar::new(requests.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{pos}/{len} [{bar:30}] {percent}%")
                .expect("static template"),
        );
        Some(bar)
    } else {
        None
    };
    let progress = bar.clone().map(|bar| {
        let callback: fetchkit::BatchProgress =
            Arc::new(move |done, _total| bar.set_position(done as u64));
        callback
    });

    let batch = fetcher
        .fetch_batch(requests, true, progress)
        .await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    for result in &batch.results {
        if !result.is_success() {
            eprintln!("{}", output::failure_line(result));
        }
        println!("{}", output::render_result(result, cli.format));
    }
    if batch.total > 1 || cli.format == OutputFormat::Summary {
        eprintln!("{}", output::batch_summary(&batch));
    }

    if batch.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILURES)
    }
}

async fn stream_urls(cli: &Cli, fetcher: &Arc<Fetcher>, urls: &[String]) -> ExitCode {
    let requests = match build_requests(cli, urls) {
        Ok(requests) => requests,
        Err(message) => {
            eprintln!("{}", message.red());
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let mut failed = 0usize;
    for mut request in requests {
        if request.output_path.is_none() {
            let name = request
                .url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|name| !name.is_empty())
                .unwrap_or("download")
                .to_string();
            request.output_path = Some(name.into());
        }

        let bar = if cli.progress {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template(
                    "{percent:>3}% {bytes}/{total_bytes} {bytes_per_sec} eta {eta}",
                )
                .expect("static template"),
            );
            Some(bar)
        } else {
            None
        };
        let callback: Option<ProgressCallback> = bar.clone().map(|bar| {
            let callback: ProgressCallback = Arc::new(move |info: &ProgressInfo| {
                if let Some(total) = info.total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(info.bytes_transferred);
            });
            callback
        });

        match fetcher.download(&request, callback.as_ref()).await {
            Ok(outcome) => {
                if let Some(bar) = bar {
                    bar.finish_and_clear();
                }
                println!(
                    "{} {} -> {} ({} bytes{} in {:?})",
                    "saved".green(),
                    request.url,
                    outcome.path.display(),
                    outcome.bytes_transferred,
                    if outcome.resumed_from > 0 {
                        format!(", resumed at {}", outcome.resumed_from)
                    } else {
                        String::new()
                    },
                    outcome.elapsed
                );
            }
            Err(err) => {
                if let Some(bar) = bar {
                    bar.abandon();
                }
                failed += 1;
                eprintln!("{}", format!("{}: {err}", request.url).red());
            }
        }
    }

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILURES)
    }
}
