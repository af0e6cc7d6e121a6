//! HTTP connection pooling.
//!
//! [`HttpPool`] owns one `reqwest::Client` configured for keep-alive
//! and per-host idle pooling, and layers the engine's own budgets on
//! top: a global connection cap and a per-host cap, both enforced with
//! semaphores. Sessions are lent through [`HttpPool::with_session`]
//! for exactly one request and never escape it; permits are RAII, so
//! cancellation at any await point returns them.

mod dns;

pub use dns::DnsCache;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fetchkit_core::{FetchError, NetworkErrorKind};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use url::Url;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct HttpPoolConfig {
    /// Cap on simultaneously lent sessions across all hosts.
    pub total_connections: usize,
    /// Cap on simultaneously lent sessions per host.
    pub connections_per_host: usize,
    /// Idle keep-alive lifetime before the transport drops a socket.
    pub keepalive_timeout: Duration,
    pub connect_timeout: Duration,
    /// Socket-level read inactivity timeout.
    pub read_timeout: Duration,
    /// DNS cache TTL.
    pub ttl_dns_cache: Duration,
    /// Verify TLS certificates.
    pub verify_ssl: bool,
    /// Screen resolved addresses against the SSRF ranges.
    pub screen_resolved_ips: bool,
    pub user_agent: String,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            total_connections: 100,
            connections_per_host: 10,
            keepalive_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            ttl_dns_cache: Duration::from_secs(300),
            verify_ssl: true,
            screen_resolved_ips: true,
            user_agent: concat!("fetchkit/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// The HTTP pool.
pub struct HttpPool {
    client: reqwest::Client,
    config: HttpPoolConfig,
    global: Arc<Semaphore>,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    dns: DnsCache,
}

impl HttpPool {
    pub fn new(config: HttpPoolConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(config.keepalive_timeout)
            .pool_max_idle_per_host(config.connections_per_host)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Network {
                kind: NetworkErrorKind::Other,
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            global: Arc::new(Semaphore::new(config.total_connections)),
            dns: DnsCache::new(config.ttl_dns_cache, config.screen_resolved_ips),
            per_host: Mutex::new(HashMap::new()),
            client,
            config,
        })
    }

    pub fn config(&self) -> &HttpPoolConfig {
        &self.config
    }

    pub fn dns(&self) -> &DnsCache {
        &self.dns
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut map = self.per_host.lock();
        Arc::clone(
            map.entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.config.connections_per_host))),
        )
    }

    /// Resolves and screens a URL's hostname through the DNS cache.
    /// IP-literal hosts were already screened by the validator.
    pub async fn preflight(&self, url: &Url) -> Result<(), FetchError> {
        if let Some(url::Host::Domain(domain)) = url.host() {
            let port = url.port_or_known_default().unwrap_or(443);
            self.dns.resolve(domain, port).await?;
        }
        Ok(())
    }

    /// Lends the pooled client to `f` for the duration of one request,
    /// under the global and per-host caps. The session never leaves
    /// the closure; permits return on every exit path.
    pub async fn with_session<F, Fut, T>(&self, host: &str, f: F) -> Result<T, FetchError>
    where
        F: FnOnce(reqwest::Client) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let host_semaphore = self.host_semaphore(host);
        let _host_permit = host_semaphore
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Cancelled)?;
        let _global_permit = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Cancelled)?;

        f(self.client.clone()).await
    }

    /// Sessions currently lent out.
    pub fn in_flight(&self) -> usize {
        self.config.total_connections - self.global.available_permits()
    }

    /// Sessions currently lent out for one host.
    pub fn in_flight_for(&self, host: &str) -> usize {
        let map = self.per_host.lock();
        match map.get(host) {
            Some(sem) => self.config.connections_per_host - sem.available_permits(),
            None => 0,
        }
    }

    /// Periodic housekeeping: drops expired DNS entries and forgets
    /// semaphores for hosts with nothing in flight.
    pub fn cleanup(&self) {
        self.dns.evict_expired();
        let per_host_cap = self.config.connections_per_host;
        self.per_host
            .lock()
            .retain(|_, sem| sem.available_permits() < per_host_cap);
    }

    /// Translates a transport error into the engine's error space.
    pub fn classify_error(err: &reqwest::Error, elapsed: Duration) -> FetchError {
        if err.is_timeout() {
            return FetchError::Timeout { elapsed };
        }
        if err.is_connect() {
            let message = err.to_string();
            if message.contains("dns") || message.contains("resolve") {
                return FetchError::Dns {
                    host: err
                        .url()
                        .and_then(|u| u.host_str())
                        .unwrap_or("<unknown>")
                        .to_string(),
                };
            }
            if message.contains("certificate") || message.contains("tls") || message.contains("ssl")
            {
                return FetchError::Tls { message };
            }
            return FetchError::Network {
                kind: NetworkErrorKind::Refused,
                message,
            };
        }
        if err.is_body() || err.is_decode() {
            return FetchError::Network {
                kind: NetworkErrorKind::Closed,
                message: err.to_string(),
            };
        }
        FetchError::Network {
            kind: NetworkErrorKind::Other,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pool(per_host: usize, total: usize) -> HttpPool {
        HttpPool::new(HttpPoolConfig {
            connections_per_host: per_host,
            total_connections: total,
            screen_resolved_ips: false,
            ..HttpPoolConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn lends_a_session_for_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .mount(&server)
            .await;

        let pool = pool(4, 8);
        let body = pool
            .with_session("test-host:80", |client| async move {
                let resp = client
                    .get(format!("{}/ping", server.uri()))
                    .send()
                    .await
                    .map_err(|e| HttpPool::classify_error(&e, Duration::ZERO))?;
                resp.text()
                    .await
                    .map_err(|e| HttpPool::classify_error(&e, Duration::ZERO))
            })
            .await
            .unwrap();
        assert_eq!(body, "pong");
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn per_host_cap_bounds_concurrency() {
        let pool = Arc::new(pool(2, 100));
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let pool = Arc::clone(&pool);
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            handles.push(tokio::spawn(async move {
                pool.with_session("capped:80", |_client| {
                    let peak = Arc::clone(&peak);
                    let current = Arc::clone(&current);
                    async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, FetchError>(())
                    }
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {:?}", peak);
    }

    #[tokio::test]
    async fn permits_return_after_errors() {
        let pool = pool(1, 1);
        let result: Result<(), FetchError> = pool
            .with_session("failing:80", |_client| async {
                Err(FetchError::Network {
                    kind: NetworkErrorKind::Reset,
                    message: "boom".into(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.in_flight_for("failing:80"), 0);
    }

    #[tokio::test]
    async fn cleanup_forgets_idle_hosts() {
        let pool = pool(2, 4);
        pool.with_session("fleeting:80", |_client| async { Ok::<_, FetchError>(()) })
            .await
            .unwrap();
        pool.cleanup();
        assert_eq!(pool.in_flight_for("fleeting:80"), 0);
    }
}
