//! fetchkit: a high-resilience content-fetch engine.
//!
//! The engine issues HTTP(S) and FTP(S) requests and returns parsed or
//! streamed results with strong guarantees about concurrency control,
//! failure isolation, backpressure, and content integrity. A fetch
//! flows through URL validation, the response cache, the in-flight
//! deduplicator, the per-host rate limiter and circuit breaker, the
//! retry controller, and the connection pools; parsed content then
//! passes the transform pipeline and lands in the cache and metrics.
//!
//! ```no_run
//! use fetchkit::{FetchRequest, Fetcher, FetcherConfig};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Fetcher::new(FetcherConfig::default())?;
//! let request = FetchRequest::get(Url::parse("https://api.example.test/data")?);
//! let result = fetcher.fetch_single(request).await;
//! if result.is_success() {
//!     println!("{:?}", result.content);
//! }
//! # Ok(())
//! # }
//! ```

mod batch;
mod config;
mod engine;
mod parser;
mod transform;

pub use batch::{BatchProgress, BatchResult};
pub use config::{FetcherConfig, FetcherConfigBuilder};
pub use engine::Fetcher;
pub use parser::{
    ContentParser, CredentialProvider, FetchBackend, JsonParser, ParserRegistry, RawParser,
    TextParser,
};
pub use transform::{ContentTransform, JsonPointerTransform, TransformPipeline, TrimTransform};

// The pieces callers configure the engine with, re-exported so a
// typical binary only depends on this crate.
pub use fetchkit_cache::{CacheBackendKind, CacheConfig, CacheStats, KvStore};
pub use fetchkit_circuitbreaker::{BreakerConfig, BreakerSnapshot, CircuitState};
pub use fetchkit_coalesce::DedupeConfig;
pub use fetchkit_core::{
    ContentKind, ErrorCategory, FetchError, FetchRequest, FetchRequestBuilder, FetchResult,
    FtpOperation, Method, ParsedContent, Priority, RequestBody,
};
pub use fetchkit_ftp::{FtpConfig, TransferType};
pub use fetchkit_metrics::{MetricsConfig, PerformanceSnapshot};
pub use fetchkit_pool::HttpPoolConfig;
pub use fetchkit_ratelimit::{Algorithm, RateLimitConfig, Strategy};
pub use fetchkit_retry::{BackoffStrategy, RetryConfig};
pub use fetchkit_stream::{
    DownloadOutcome, ProgressCallback, ProgressInfo, StreamConfig, VerificationMethod,
};
pub use fetchkit_url::{analyze_url, host_key, normalize_url, UrlAnalysis, ValidatorConfig};
