//! The fetcher: composition of the whole stack.
//!
//! A single fetch travels: validation → cache lookup → deduplication →
//! rate limiter → circuit breaker → concurrency semaphore → attempt
//! loop (pool, transport, bounded body read) → parser → transform
//! pipeline → cache store → metrics.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use url::Url;

use fetchkit_cache::{CacheStats, ResponseCache};
use fetchkit_circuitbreaker::{BreakerRegistry, BreakerSnapshot};
use fetchkit_coalesce::{DedupeStats, Deduplicator};
use fetchkit_core::{
    FetchError, FetchRequest, FetchResult, FtpOperation, Method, ParsedContent, RequestKey,
};
use fetchkit_ftp::FtpPool;
use fetchkit_metrics::{MetricsCollector, PerformanceSnapshot, RequestRecord, TransferRecord};
use fetchkit_pool::HttpPool;
use fetchkit_ratelimit::RateLimiter;
use fetchkit_retry::{RetryController, RetryDecision};
use fetchkit_stream::{download_http, DownloadOutcome, ProgressCallback};
use fetchkit_url::{host_key, UrlValidator};

use crate::config::FetcherConfig;
use crate::parser::{CredentialProvider, FetchBackend, ParserRegistry};
use crate::transform::TransformPipeline;

/// Raw transport response before parsing.
struct RawResponse {
    final_url: String,
    status: u16,
    headers: BTreeMap<String, String>,
    body: Bytes,
}

/// The engine. Owns every component for its lifetime; cheap to share
/// behind an `Arc` (all interior state is already shared).
pub struct Fetcher {
    config: FetcherConfig,
    validator: UrlValidator,
    http: Arc<HttpPool>,
    ftp: Arc<FtpPool>,
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    retry: Arc<RetryController>,
    cache: Option<Arc<ResponseCache>>,
    dedupe: Option<Arc<Deduplicator<FetchResult>>>,
    metrics: Arc<MetricsCollector>,
    concurrency: Arc<Semaphore>,
    parsers: Arc<ParserRegistry>,
    transforms: TransformPipeline,
    credentials: Option<Arc<dyn CredentialProvider>>,
    backends: Mutex<HashMap<String, Arc<dyn FetchBackend>>>,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Result<Fetcher, FetchError> {
        Self::with_parts(config, ParserRegistry::with_defaults(), TransformPipeline::new(), None)
    }

    /// Full constructor for callers plugging in parsers, transforms,
    /// or a credential provider.
    pub fn with_parts(
        config: FetcherConfig,
        parsers: ParserRegistry,
        transforms: TransformPipeline,
        credentials: Option<Arc<dyn CredentialProvider>>,
    ) -> Result<Fetcher, FetchError> {
        let http = Arc::new(HttpPool::new(config.http.clone())?);
        let ftp = Arc::new(FtpPool::new(config.ftp.clone()));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let retry = Arc::new(RetryController::new(config.retry.clone()));
        let cache = config
            .cache
            .clone()
            .map(|cache_config| Arc::new(ResponseCache::new(cache_config)));
        let dedupe = config
            .dedupe
            .clone()
            .map(|dedupe_config| Arc::new(Deduplicator::new(dedupe_config)));
        let metrics = Arc::new(MetricsCollector::new(config.metrics.clone()));
        let concurrency = Arc::new(Semaphore::new(config.max_concurrent_requests));

        Ok(Fetcher {
            validator: UrlValidator::new(config.validator.clone()),
            config,
            http,
            ftp,
            limiter,
            breakers,
            retry,
            cache,
            dedupe,
            metrics,
            concurrency,
            parsers: Arc::new(parsers),
            transforms,
            credentials,
            backends: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Spawns the background maintenance tasks (dedup sweeper, FTP idle
    /// eviction, pool cleanup). Call once from an async context; abort
    /// the handles to stop them.
    pub fn spawn_maintenance(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Some(dedupe) = &self.dedupe {
            handles.push(dedupe.spawn_sweeper());
        }
        handles.push(self.ftp.spawn_sweeper());
        let http = Arc::clone(&self.http);
        handles.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                http.cleanup();
            }
        }));
        handles
    }

    /// Registers an opaque fetch backend under its name.
    pub fn register_backend(&self, backend: Arc<dyn FetchBackend>) {
        self.backends
            .lock()
            .insert(backend.name().to_string(), backend);
    }

    /// Routes a request through a registered backend instead of the
    /// built-in transports.
    pub async fn fetch_with_backend(&self, name: &str, request: &FetchRequest) -> FetchResult {
        let backend = { self.backends.lock().get(name).cloned() };
        let started = Instant::now();
        let result = match backend {
            Some(backend) => match backend.fetch(request).await {
                Ok(result) => result,
                Err(err) => FetchResult::failure(request.url.as_str(), err, started.elapsed()),
            },
            None => FetchResult::failure(
                request.url.as_str(),
                FetchError::Unknown {
                    message: format!("no fetch backend named '{name}'"),
                },
                started.elapsed(),
            ),
        };
        self.record(request, &result);
        result
    }

    /// Fetches one request end to end. Failures come back as a
    /// `FetchResult` with the error set, never as a panic or an `Err`.
    pub async fn fetch_single(&self, request: FetchRequest) -> FetchResult {
        let started = Instant::now();
        let mut request = request;

        if let Err(err) = self.validator.validate(request.url.as_str()) {
            let result = FetchResult::failure(request.url.as_str(), err, started.elapsed());
            self.record(&request, &result);
            return result;
        }

        if let Some(provider) = &self.credentials {
            if let Err(err) = provider.apply(&mut request).await {
                let result = FetchResult::failure(request.url.as_str(), err, started.elapsed());
                self.record(&request, &result);
                return result;
            }
        }

        // Cache consult (GET only).
        if request.method == Method::Get && !request.is_ftp() {
            if let Some(cache) = &self.cache {
                match cache.get(request.url.as_str(), &request.headers).await {
                    Ok(Some(entry)) => {
                        let result = self.result_from_cache(&request, entry, started);
                        self.record(&request, &result);
                        return result;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "cache lookup failed, fetching anyway");
                    }
                }
            }
        }

        let dedupe = if request.method == Method::Get && request.output_path.is_none() {
            self.dedupe.as_ref()
        } else {
            None
        };
        let result = match dedupe {
            Some(dedupe) => {
                let key = RequestKey::for_request(&request);
                dedupe
                    .deduplicate(key, || self.run_request(request.clone()))
                    .await
            }
            None => self.run_request(request.clone()).await,
        };

        self.record(&request, &result);
        result
    }

    /// The resilient request loop: admission, breaker, concurrency,
    /// attempts with backoff.
    async fn run_request(&self, request: FetchRequest) -> FetchResult {
        let host = host_key(&request.url);
        let started = Instant::now();

        if let Err(err) = self.limiter.acquire_checked(&host, &self.breakers).await {
            return FetchResult::failure(request.url.as_str(), err, started.elapsed());
        }

        let breaker = self.breakers.breaker(&host);
        if let Err(err) = breaker.try_acquire() {
            return FetchResult::failure(request.url.as_str(), err, started.elapsed());
        }

        let _permit = match self.concurrency.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return FetchResult::failure(
                    request.url.as_str(),
                    FetchError::Cancelled,
                    started.elapsed(),
                )
            }
        };

        let mut attempt: u32 = 0;
        loop {
            let outcome = if request.is_ftp() {
                self.execute_ftp(&request).await
            } else {
                self.execute_http(&request, &host).await
            };

            match outcome {
                Ok(raw) => {
                    breaker.observe(None);
                    self.retry.record_outcome(&host, true);
                    return self.complete_success(&request, raw, attempt, started).await;
                }
                Err(err) => {
                    breaker.observe(Some(&err));
                    self.retry.record_outcome(&host, false);
                    if err.status().is_none() {
                        self.limiter.record_failure(&host);
                    }

                    match self.retry.decide(&err, attempt, &host) {
                        RetryDecision::RetryAfter(delay) => {
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        RetryDecision::GiveUp => {
                            let result = FetchResult::failure(
                                request.url.as_str(),
                                err,
                                started.elapsed(),
                            )
                            .with_retry_count(attempt);
                            return result;
                        }
                    }
                }
            }
        }
    }

    /// Parse, transform, cache, assemble.
    async fn complete_success(
        &self,
        request: &FetchRequest,
        raw: RawResponse,
        attempt: u32,
        started: Instant,
    ) -> FetchResult {
        let parsed = self.parsers.parse(
            &raw.body,
            request.content_type,
            &raw.headers,
            Some(&request.url),
        );
        let (content, kind) = match parsed {
            Ok((content, kind)) => (content, kind),
            Err(err) => {
                return FetchResult::failure(&raw.final_url, err, started.elapsed())
                    .with_retry_count(attempt)
            }
        };

        let content = match self.transforms.apply(content) {
            Ok(content) => content,
            Err(err) => {
                return FetchResult::failure(&raw.final_url, err, started.elapsed())
                    .with_retry_count(attempt)
            }
        };

        if request.method == Method::Get && !request.is_ftp() {
            if let Some(cache) = &self.cache {
                if let Err(err) = cache
                    .put(
                        request.url.as_str(),
                        &request.headers,
                        raw.status,
                        raw.headers.clone(),
                        &raw.body,
                        self.config.cache_ttl,
                    )
                    .await
                {
                    tracing::warn!(error = %err, "failed to store response in cache");
                }
            }
        }

        let mut result = FetchResult::success(raw.final_url, raw.status, started.elapsed());
        result.headers = raw.headers;
        result.content = Some(content);
        result.content_kind = Some(kind);
        result.retry_count = attempt;
        result
    }

    /// One HTTP attempt: session borrow, send, bounded body read, rate
    /// limiter feedback. Non-2xx statuses come back as errors.
    async fn execute_http(
        &self,
        request: &FetchRequest,
        host: &str,
    ) -> Result<RawResponse, FetchError> {
        let started = Instant::now();
        self.http.preflight(&request.url).await?;

        let timeout = request.timeout.unwrap_or(self.config.total_timeout);
        let max_body = self.config.max_response_size;

        let raw = self
            .http
            .with_session(host, |client| async move {
                let mut builder = client
                    .request(to_reqwest_method(request.method), request.url.clone())
                    .timeout(timeout);
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                if !request.params.is_empty() {
                    builder = builder.query(&request.params);
                }
                if let Some(body) = &request.body {
                    builder = match body {
                        fetchkit_core::RequestBody::Bytes(b) => builder.body(b.to_vec()),
                        fetchkit_core::RequestBody::Text(s) => builder.body(s.clone()),
                        fetchkit_core::RequestBody::Json(v) => builder.json(v),
                        fetchkit_core::RequestBody::Form(pairs) => builder.form(pairs),
                    };
                }

                let response = builder
                    .send()
                    .await
                    .map_err(|e| HttpPool::classify_error(&e, started.elapsed()))?;

                let status = response.status().as_u16();
                let final_url = response.url().to_string();
                let headers: BTreeMap<String, String> = response
                    .headers()
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.as_str().to_ascii_lowercase(),
                            String::from_utf8_lossy(value.as_bytes()).into_owned(),
                        )
                    })
                    .collect();

                let mut body = Vec::new();
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| HttpPool::classify_error(&e, started.elapsed()))?;
                    if body.len() + chunk.len() > max_body {
                        return Err(FetchError::Content {
                            message: format!("response exceeds the {max_body}-byte limit"),
                        });
                    }
                    body.extend_from_slice(&chunk);
                }

                Ok(RawResponse {
                    final_url,
                    status,
                    headers,
                    body: Bytes::from(body),
                })
            })
            .await?;

        let latency = started.elapsed();
        self.limiter
            .record_response(host, raw.status, &raw.headers, latency);

        if !(200..300).contains(&raw.status) {
            let retry_after = fetchkit_ratelimit::parse_hints(&raw.headers).wait_hint();
            return Err(FetchError::from_status(raw.status, &raw.final_url, retry_after));
        }
        Ok(raw)
    }

    /// One FTP attempt. Results are synthesized as JSON documents so
    /// the normal parse path applies.
    async fn execute_ftp(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
        let body = match request.operation {
            FtpOperation::Download => {
                let dest = request.output_path.clone().ok_or_else(|| FetchError::Content {
                    message: "FTP download requires an output path".to_string(),
                })?;
                let outcome =
                    fetchkit_ftp::download(&self.ftp, &request.url, &dest, &self.config.stream, None)
                        .await?;
                self.record_transfer(&request.url, "download", &outcome);
                serde_json::json!({
                    "path": outcome.path,
                    "bytes_transferred": outcome.bytes_transferred,
                    "total_bytes": outcome.total_bytes,
                    "resumed_from": outcome.resumed_from,
                })
            }
            FtpOperation::List => {
                let entries = fetchkit_ftp::list(&self.ftp, &request.url).await?;
                serde_json::json!(entries
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "name": e.name,
                            "is_dir": e.is_dir,
                            "size": e.size,
                        })
                    })
                    .collect::<Vec<_>>())
            }
            FtpOperation::Info => {
                let info = fetchkit_ftp::info(&self.ftp, &request.url).await?;
                serde_json::json!({
                    "path": info.path,
                    "size": info.size,
                    "modified": info.modified,
                })
            }
        };

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Ok(RawResponse {
            final_url: request.url.to_string(),
            status: 200,
            headers,
            body: Bytes::from(serde_json::to_vec(&body).unwrap_or_default()),
        })
    }

    /// Streams a download to disk (HTTP(S) via ranged GET, FTP(S) via
    /// REST), with resume and verification per the stream config.
    pub async fn download(
        &self,
        request: &FetchRequest,
        progress: Option<&ProgressCallback>,
    ) -> Result<DownloadOutcome, FetchError> {
        self.validator.validate(request.url.as_str())?;
        let dest = request
            .output_path
            .clone()
            .ok_or_else(|| FetchError::Content {
                message: "download requires an output path".to_string(),
            })?;

        let outcome = if request.is_ftp() {
            fetchkit_ftp::download(&self.ftp, &request.url, &dest, &self.config.stream, progress)
                .await?
        } else {
            download_http(&self.http, &request.url, &dest, &self.config.stream, progress).await?
        };
        self.record_transfer(&request.url, "download", &outcome);
        Ok(outcome)
    }

    fn result_from_cache(
        &self,
        request: &FetchRequest,
        entry: fetchkit_cache::CacheEntry,
        started: Instant,
    ) -> FetchResult {
        let body = Bytes::from(entry.body);
        let parsed = self.parsers.parse(
            &body,
            request.content_type,
            &entry.headers,
            Some(&request.url),
        );
        let (content, kind) = match parsed {
            Ok(ok) => ok,
            Err(_) => (ParsedContent::Bytes(body), fetchkit_core::ContentKind::Raw),
        };

        let mut result =
            FetchResult::success(request.url.as_str(), entry.status, started.elapsed());
        result.headers = entry.headers;
        result.content = Some(content);
        result.content_kind = Some(kind);
        result.mark_cached()
    }

    fn record(&self, request: &FetchRequest, result: &FetchResult) {
        self.metrics.record_request(RequestRecord {
            url: result.url.clone(),
            host: host_key(&request.url),
            method: if request.is_ftp() {
                request.operation.to_string()
            } else {
                request.method.to_string()
            },
            status: if result.status == 0 {
                None
            } else {
                Some(result.status)
            },
            response_time: result.response_time,
            size: result.content.as_ref().map(ParsedContent::len).unwrap_or(0),
            error: result.error.as_ref().map(FetchError::category),
            at: Instant::now(),
        });
    }

    fn record_transfer(&self, url: &Url, operation: &str, outcome: &DownloadOutcome) {
        self.metrics.record_transfer(TransferRecord {
            url: url.to_string(),
            operation: operation.to_string(),
            bytes: outcome.bytes_transferred,
            duration: outcome.elapsed,
            chunk_size: outcome.final_chunk_size,
            reused_connection: outcome.resumed_from > 0,
            error: None,
            at: Instant::now(),
        });
    }

    // Observability surfaces.

    pub fn metrics(&self) -> PerformanceSnapshot {
        self.metrics.snapshot()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshot()
    }

    pub fn dedupe_stats(&self) -> Option<DedupeStats> {
        self.dedupe.as_ref().map(|d| d.stats())
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Patch => reqwest::Method::PATCH,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchkit_url::ValidatorConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_fetcher() -> Fetcher {
        let mut config = FetcherConfig::builder()
            .validator(ValidatorConfig::permissive())
            .retry(
                fetchkit_retry::RetryConfig::builder()
                    .max_retries(0)
                    .build_config(),
            )
            .build();
        config.http.screen_resolved_ips = false;
        Fetcher::new(config).unwrap()
    }

    fn get(url: &str) -> FetchRequest {
        FetchRequest::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn fetches_and_parses_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"ok":true}"#)
                    .insert_header("content-type", "application/json"),
            )
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let result = fetcher
            .fetch_single(get(&format!("{}/data", server.uri())))
            .await;

        assert!(result.is_success(), "error = {:?}", result.error);
        assert_eq!(result.status, 200);
        assert_eq!(
            result.content.as_ref().and_then(ParsedContent::as_json),
            Some(&serde_json::json!({"ok": true}))
        );
        assert!(!result.from_cache);
    }

    #[tokio::test]
    async fn validation_failures_never_touch_the_network() {
        let fetcher = test_fetcher();
        let result = fetcher.fetch_single(get("https://example.test:22/x")).await;
        assert!(!result.is_success());
        assert!(matches!(result.error, Some(FetchError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn not_found_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let result = fetcher
            .fetch_single(get(&format!("{}/missing", server.uri())))
            .await;
        assert_eq!(result.status, 404);
        assert!(matches!(result.error, Some(FetchError::NotFound { .. })));
        assert_eq!(result.retry_count, 0);
    }

    #[tokio::test]
    async fn metrics_observe_every_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        fetcher
            .fetch_single(get(&format!("{}/a", server.uri())))
            .await;
        fetcher
            .fetch_single(get(&format!("{}/b", server.uri())))
            .await;

        let snapshot = fetcher.metrics();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.successful, 2);
    }

    #[tokio::test]
    async fn ftp_download_without_output_path_fails_cleanly() {
        let mut config = FetcherConfig::builder()
            .validator(ValidatorConfig::permissive())
            .build();
        config.http.screen_resolved_ips = false;
        let fetcher = Fetcher::new(config).unwrap();

        let result = fetcher
            .fetch_single(get("ftp://127.0.0.1:2121/file.bin"))
            .await;
        assert!(!result.is_success());
        assert!(matches!(result.error, Some(FetchError::Content { .. })));
    }
}
