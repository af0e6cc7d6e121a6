//! Engine configuration.

use std::time::Duration;

use fetchkit_cache::CacheConfig;
use fetchkit_circuitbreaker::BreakerConfig;
use fetchkit_coalesce::DedupeConfig;
use fetchkit_ftp::FtpConfig;
use fetchkit_metrics::MetricsConfig;
use fetchkit_pool::HttpPoolConfig;
use fetchkit_ratelimit::RateLimitConfig;
use fetchkit_retry::RetryConfig;
use fetchkit_stream::StreamConfig;
use fetchkit_url::ValidatorConfig;

/// Everything a [`crate::Fetcher`] is built from. Each component keeps
/// its own config type; this struct just assembles them with the
/// engine-level knobs.
#[derive(Clone)]
pub struct FetcherConfig {
    pub validator: ValidatorConfig,
    pub http: HttpPoolConfig,
    pub ftp: FtpConfig,
    pub rate_limit: RateLimitConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    /// `None` disables response caching.
    pub cache: Option<CacheConfig>,
    /// `None` disables in-flight deduplication.
    pub dedupe: Option<DedupeConfig>,
    pub stream: StreamConfig,
    pub metrics: MetricsConfig,
    /// Engine-wide concurrency budget.
    pub max_concurrent_requests: usize,
    /// Responses larger than this fail with a content error.
    pub max_response_size: usize,
    /// Total per-attempt timeout; per-request overrides replace it.
    pub total_timeout: Duration,
    /// TTL passed to the cache on store (falls back to the cache's own
    /// default when `None`).
    pub cache_ttl: Option<Duration>,
    /// Release batch tasks in priority order.
    pub prioritize_batches: bool,
}

impl FetcherConfig {
    pub fn builder() -> FetcherConfigBuilder {
        FetcherConfigBuilder::new()
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfigBuilder::new().build()
    }
}

/// Builder for [`FetcherConfig`].
pub struct FetcherConfigBuilder {
    config: FetcherConfig,
}

impl Default for FetcherConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FetcherConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: FetcherConfig {
                validator: ValidatorConfig::default(),
                http: HttpPoolConfig::default(),
                ftp: FtpConfig::default(),
                rate_limit: RateLimitConfig::default(),
                breaker: BreakerConfig::default(),
                retry: RetryConfig::default(),
                cache: None,
                dedupe: Some(DedupeConfig::default()),
                stream: StreamConfig::default(),
                metrics: MetricsConfig::default(),
                max_concurrent_requests: 10,
                max_response_size: 10 * 1024 * 1024,
                total_timeout: Duration::from_secs(30),
                cache_ttl: None,
                prioritize_batches: true,
            },
        }
    }

    pub fn validator(mut self, validator: ValidatorConfig) -> Self {
        self.config.validator = validator;
        self
    }

    pub fn http(mut self, http: HttpPoolConfig) -> Self {
        self.config.http = http;
        self
    }

    pub fn ftp(mut self, ftp: FtpConfig) -> Self {
        self.config.ftp = ftp;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.config.breaker = breaker;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = Some(cache);
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.config.cache = None;
        self
    }

    pub fn dedupe(mut self, dedupe: DedupeConfig) -> Self {
        self.config.dedupe = Some(dedupe);
        self
    }

    pub fn no_dedupe(mut self) -> Self {
        self.config.dedupe = None;
        self
    }

    pub fn stream(mut self, stream: StreamConfig) -> Self {
        self.config.stream = stream;
        self
    }

    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    pub fn max_concurrent_requests(mut self, n: usize) -> Self {
        self.config.max_concurrent_requests = n.max(1);
        self
    }

    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.config.max_response_size = bytes;
        self
    }

    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.config.total_timeout = timeout;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = Some(ttl);
        self
    }

    pub fn prioritize_batches(mut self, yes: bool) -> Self {
        self.config.prioritize_batches = yes;
        self
    }

    pub fn build(self) -> FetcherConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let config = FetcherConfig::default();
        assert_eq!(config.max_concurrent_requests, 10);
        assert!(config.cache.is_none());
        assert!(config.dedupe.is_some());
        assert_eq!(config.total_timeout, Duration::from_secs(30));
        assert!(config.prioritize_batches);
    }

    #[test]
    fn builder_overrides() {
        let config = FetcherConfig::builder()
            .max_concurrent_requests(0)
            .cache(CacheConfig::default())
            .no_dedupe()
            .cache_ttl(Duration::from_secs(60))
            .build();
        assert_eq!(config.max_concurrent_requests, 1);
        assert!(config.cache.is_some());
        assert!(config.dedupe.is_none());
        assert_eq!(config.cache_ttl, Some(Duration::from_secs(60)));
    }
}
