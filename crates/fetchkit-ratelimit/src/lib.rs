//! Per-host adaptive rate limiting.
//!
//! One [`RateLimiter`] serves every host the engine talks to; state is
//! keyed by the URL authority (`host:port`). Five admission algorithms
//! are available (see [`Algorithm`]); all of them respect server
//! declared limits when [`RateLimitConfig::respect_server_limits`] is
//! on, and the adaptive algorithm additionally tunes its rate from
//! observed outcomes.
//!
//! Locking discipline: the host map is locked only for lookup/insert;
//! each host's state has its own mutex, and neither lock is ever held
//! across an await — [`RateLimiter::acquire`] computes a delay under
//! the lock, releases it, sleeps, and retries.

mod bucket;
mod config;
mod events;
mod headers;

pub use config::{Algorithm, RateLimitConfig, RateLimitConfigBuilder, Strategy};
pub use events::RateLimitEvent;
pub use headers::{parse_hints, ServerHints};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fetchkit_circuitbreaker::BreakerRegistry;
use fetchkit_core::FetchError;
use parking_lot::Mutex;

#[cfg(feature = "metrics")]
use metrics::{counter, histogram};

use bucket::{Admission, HostState};

/// Point-in-time view of one host's limiter state.
#[derive(Debug, Clone, PartialEq)]
pub struct HostRateSnapshot {
    pub host: String,
    pub rps: f64,
    pub consecutive_failures: u32,
    pub server_rps: Option<f64>,
    pub tokens_available: Option<f64>,
}

/// The per-host rate limiter.
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    hosts: Mutex<HashMap<String, Arc<Mutex<HostState>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn host_state(&self, host: &str) -> Arc<Mutex<HostState>> {
        let mut map = self.hosts.lock();
        Arc::clone(
            map.entry(host.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(HostState::new(&self.config)))),
        )
    }

    /// One admission attempt: `Duration::ZERO` means admitted (capacity
    /// consumed); anything else is the wait before the next attempt.
    pub fn reserve(&self, host: &str) -> Duration {
        let state = self.host_state(host);
        let admission = { state.lock().poll(&self.config, Instant::now()) };
        match admission {
            Admission::Admitted => {
                self.config.event_listeners.emit(&RateLimitEvent::Admitted {
                    host: host.to_string(),
                    timestamp: Instant::now(),
                    waited: Duration::ZERO,
                });
                Duration::ZERO
            }
            Admission::Wait(delay) => {
                self.config.event_listeners.emit(&RateLimitEvent::Delayed {
                    host: host.to_string(),
                    timestamp: Instant::now(),
                    delay,
                });
                delay
            }
        }
    }

    /// Awaits admission for `host`, returning the total time waited.
    pub async fn acquire(&self, host: &str) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            let delay = self.reserve(host);
            if delay.is_zero() {
                #[cfg(feature = "metrics")]
                {
                    counter!("fetchkit_ratelimit_admitted_total", "host" => host.to_string())
                        .increment(1);
                    histogram!("fetchkit_ratelimit_wait_seconds", "host" => host.to_string())
                        .record(waited.as_secs_f64());
                }
                return waited;
            }
            waited += delay;
            tokio::time::sleep(delay).await;
        }
    }

    /// Like [`acquire`](Self::acquire), but refuses immediately with
    /// `CircuitOpen` when the host's breaker is open, without consuming
    /// any tokens.
    pub async fn acquire_checked(
        &self,
        host: &str,
        breakers: &BreakerRegistry,
    ) -> Result<Duration, FetchError> {
        if breakers.is_open(host) {
            return Err(FetchError::CircuitOpen {
                host: host.to_string(),
            });
        }
        Ok(self.acquire(host).await)
    }

    /// Feeds a response's status, headers, and latency back into the
    /// host's state: server hints are honored, failures back the
    /// adaptive rate off, fast successes nudge it up.
    pub fn record_response(
        &self,
        host: &str,
        status: u16,
        headers: &BTreeMap<String, String>,
        latency: Duration,
    ) {
        let hints = parse_hints(headers);
        let state = self.host_state(host);
        let mut adjusted_rps = None;
        let mut observed_server_rps = None;

        {
            let mut s = state.lock();

            if let Some(limit) = hints.limit {
                let window_secs = self.config.window.as_secs_f64().max(1.0);
                let server_rps = limit / window_secs;
                s.server_rps = Some(server_rps);
                if self.config.respect_server_limits {
                    let capped = (0.8 * server_rps).max(self.config.min_requests_per_second);
                    if capped < s.rps {
                        s.rps = capped;
                        adjusted_rps = Some(s.rps);
                    }
                    observed_server_rps = Some(server_rps);
                }
            }

            if let Some(wait) = hints.wait_hint() {
                s.server_reset = Some(Instant::now() + wait);
            }

            if status == 429 || status >= 500 {
                s.consecutive_failures += 1;
                if self.config.algorithm == Algorithm::Adaptive {
                    s.rps = (s.rps * (1.0 - self.config.adaptive_factor))
                        .clamp(
                            self.config.min_requests_per_second,
                            self.config.max_requests_per_second,
                        );
                    adjusted_rps = Some(s.rps);
                }
            } else if (200..300).contains(&status) {
                s.consecutive_failures = 0;
                if self.config.algorithm == Algorithm::Adaptive && latency < Duration::from_secs(1)
                {
                    s.rps = (s.rps * (1.0 + 0.1 * self.config.adaptive_factor))
                        .clamp(
                            self.config.min_requests_per_second,
                            self.config.max_requests_per_second,
                        );
                    adjusted_rps = Some(s.rps);
                }
            }
        }

        if let Some(server_rps) = observed_server_rps {
            self.config
                .event_listeners
                .emit(&RateLimitEvent::ServerLimitObserved {
                    host: host.to_string(),
                    timestamp: Instant::now(),
                    server_rps,
                });
        }
        if let Some(rps) = adjusted_rps {
            tracing::debug!(host, rps, "effective rate adjusted");
            self.config
                .event_listeners
                .emit(&RateLimitEvent::RateAdjusted {
                    host: host.to_string(),
                    timestamp: Instant::now(),
                    rps,
                });
        }
    }

    /// Registers a transport-level failure (no response to parse).
    pub fn record_failure(&self, host: &str) {
        let state = self.host_state(host);
        let mut s = state.lock();
        s.consecutive_failures += 1;
    }

    pub fn snapshot(&self, host: &str) -> Option<HostRateSnapshot> {
        let state = { self.hosts.lock().get(host).cloned() }?;
        let s = state.lock();
        Some(HostRateSnapshot {
            host: host.to_string(),
            rps: s.rps,
            consecutive_failures: s.consecutive_failures,
            server_rps: s.server_rps,
            tokens_available: s.tokens_available(),
        })
    }

    /// Number of hosts with limiter state.
    pub fn host_count(&self) -> usize {
        self.hosts.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn burst_admits_without_waiting() {
        let limiter = RateLimitConfig::builder()
            .requests_per_second(10.0)
            .burst_size(5)
            .build();
        for _ in 0..5 {
            assert_eq!(limiter.acquire("a.test:443").await, Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn exhausted_bucket_waits() {
        let limiter = RateLimitConfig::builder()
            .requests_per_second(100.0)
            .burst_size(1)
            .build();
        assert_eq!(limiter.acquire("a.test:443").await, Duration::ZERO);
        let waited = limiter.acquire("a.test:443").await;
        assert!(waited > Duration::ZERO);
    }

    #[test]
    fn hosts_are_independent() {
        let limiter = RateLimitConfig::builder()
            .requests_per_second(10.0)
            .burst_size(1)
            .build();
        assert_eq!(limiter.reserve("a.test:443"), Duration::ZERO);
        assert!(limiter.reserve("a.test:443") > Duration::ZERO);
        assert_eq!(limiter.reserve("b.test:443"), Duration::ZERO);
        assert_eq!(limiter.host_count(), 2);
    }

    #[test]
    fn server_limit_caps_effective_rate() {
        let limiter = RateLimitConfig::builder()
            .requests_per_second(50.0)
            .window(Duration::from_secs(60))
            .build();
        // Server declares 600 per 60 s window = 10 rps; cap is 8 rps.
        limiter.record_response(
            "a.test:443",
            200,
            &headers(&[("x-ratelimit-limit", "600")]),
            Duration::from_millis(100),
        );
        let snap = limiter.snapshot("a.test:443").unwrap();
        assert!((snap.rps - 8.0).abs() < 1e-9, "rps = {}", snap.rps);
        assert_eq!(snap.server_rps, Some(10.0));
    }

    #[test]
    fn adaptive_rate_reacts_to_outcomes() {
        let limiter = RateLimitConfig::builder()
            .algorithm(Algorithm::Adaptive)
            .requests_per_second(10.0)
            .adaptive_factor(0.5)
            .rate_bounds(1.0, 100.0)
            .build();
        limiter.record_response("a.test:443", 503, &BTreeMap::new(), Duration::from_millis(10));
        let after_failure = limiter.snapshot("a.test:443").unwrap().rps;
        assert!((after_failure - 5.0).abs() < 1e-9);

        limiter.record_response("a.test:443", 200, &BTreeMap::new(), Duration::from_millis(10));
        let after_success = limiter.snapshot("a.test:443").unwrap().rps;
        assert!(after_success > after_failure);
        assert_eq!(
            limiter.snapshot("a.test:443").unwrap().consecutive_failures,
            0
        );
    }

    #[test]
    fn retry_after_defers_adaptive_admission() {
        let limiter = RateLimitConfig::builder()
            .algorithm(Algorithm::Adaptive)
            .requests_per_second(100.0)
            .burst_size(10)
            .build();
        limiter.record_response(
            "a.test:443",
            429,
            &headers(&[("retry-after", "2")]),
            Duration::from_millis(10),
        );
        // Plenty of tokens, but the server said to hold off.
        let delay = limiter.reserve("a.test:443");
        assert!(delay >= Duration::from_millis(1900), "delay {delay:?}");
    }

    #[tokio::test]
    async fn circuit_open_short_circuits_acquire() {
        let limiter = RateLimitConfig::builder().build();
        let breakers = fetchkit_circuitbreaker::BreakerConfig::builder()
            .failure_threshold(1)
            .build();
        breakers.breaker("a.test:443").record_failure();
        let err = limiter
            .acquire_checked("a.test:443", &breakers)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::CircuitOpen { .. }));
        // The other host is unaffected.
        assert!(limiter.acquire_checked("b.test:443", &breakers).await.is_ok());
    }
}
