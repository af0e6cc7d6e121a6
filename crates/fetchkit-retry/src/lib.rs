//! Retry control: classification, bounded attempts, backoff.
//!
//! The controller decides, for every failed attempt, whether to retry
//! and how long to sleep first. Classification comes from
//! [`FetchError::category`]; delay curves live in [`BackoffStrategy`].
//! Total attempts are `max_retries + 1`, and on the final failure the
//! last error is returned to the caller verbatim.

mod backoff;
mod events;

pub use backoff::BackoffStrategy;
pub use events::RetryEvent;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fetchkit_core::events::{EventListeners, FnListener};
use fetchkit_core::FetchError;
use parking_lot::Mutex;

/// Configuration for [`RetryController`].
#[derive(Clone)]
pub struct RetryConfig {
    pub strategy: BackoffStrategy,
    /// Base delay, the curve's unit step.
    pub base_delay: Duration,
    /// Upper clamp applied before `Retry-After` and jitter.
    pub max_delay: Duration,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Jitter amplitude as a fraction of the delay; 0 disables it.
    pub jitter_factor: f64,
    pub(crate) name: String,
    pub(crate) event_listeners: EventListeners<RetryEvent>,
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfigBuilder::new().build_config()
    }
}

/// Builder for [`RetryConfig`].
///
/// Defaults: exponential backoff, 1 s base, 60 s max, 3 retries,
/// jitter factor 0.1.
pub struct RetryConfigBuilder {
    strategy: BackoffStrategy,
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    jitter_factor: f64,
    name: String,
    event_listeners: EventListeners<RetryEvent>,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: 3,
            jitter_factor: 0.1,
            name: "<unnamed>".to_string(),
            event_listeners: EventListeners::new(),
        }
    }

    pub fn strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn base_delay(mut self, base: Duration) -> Self {
        self.base_delay = base;
        self
    }

    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Callback before each sleep `(attempt, delay)`; attempt is 1-based.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Scheduled { attempt, delay, .. } = event {
                f(*attempt, *delay);
            }
        }));
        self
    }

    /// Callback when attempts run out `(total_attempts)`.
    pub fn on_exhausted<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Exhausted { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    pub fn build_config(self) -> RetryConfig {
        RetryConfig {
            strategy: self.strategy,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            max_retries: self.max_retries,
            jitter_factor: self.jitter_factor,
            name: self.name,
            event_listeners: self.event_listeners,
        }
    }

    pub fn build(self) -> RetryController {
        RetryController::new(self.build_config())
    }
}

/// What the controller says to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep this long, then try again.
    RetryAfter(Duration),
    /// Surface the error; it is final.
    GiveUp,
}

/// The retry controller. Host failure counts (for the adaptive curve)
/// are the only mutable state.
pub struct RetryController {
    config: Arc<RetryConfig>,
    host_failures: Mutex<HashMap<String, u32>>,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config: Arc::new(config),
            host_failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Total attempts the engine should budget for.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries + 1
    }

    /// Decides what to do after attempt `attempt` (0-based) against
    /// `host` failed with `error`.
    ///
    /// `CircuitOpen` never consumes an attempt and is always final here;
    /// the engine handles any wait-and-probe policy above.
    pub fn decide(&self, error: &FetchError, attempt: u32, host: &str) -> RetryDecision {
        if matches!(error, FetchError::CircuitOpen { .. }) {
            return RetryDecision::GiveUp;
        }
        if !error.is_retryable() {
            self.config
                .event_listeners
                .emit(&RetryEvent::NonRetryable {
                    name: self.config.name.clone(),
                    timestamp: Instant::now(),
                    category: error.category(),
                });
            return RetryDecision::GiveUp;
        }
        if attempt >= self.config.max_retries {
            self.config.event_listeners.emit(&RetryEvent::Exhausted {
                name: self.config.name.clone(),
                timestamp: Instant::now(),
                attempts: attempt + 1,
            });
            return RetryDecision::GiveUp;
        }

        let host_failures = { *self.host_failures.lock().get(host).unwrap_or(&0) };
        let delay = backoff::compute_delay(
            self.config.strategy,
            self.config.base_delay,
            self.config.max_delay,
            self.config.jitter_factor,
            attempt,
            error,
            host_failures,
        );

        tracing::debug!(
            host,
            attempt = attempt + 1,
            ?delay,
            category = %error.category(),
            "scheduling retry"
        );
        self.config.event_listeners.emit(&RetryEvent::Scheduled {
            name: self.config.name.clone(),
            timestamp: Instant::now(),
            attempt: attempt + 1,
            delay,
            category: error.category(),
        });

        RetryDecision::RetryAfter(delay)
    }

    /// Records an attempt outcome for the host multiplier.
    pub fn record_outcome(&self, host: &str, success: bool) {
        let mut map = self.host_failures.lock();
        if success {
            map.remove(host);
        } else {
            *map.entry(host.to_string()).or_insert(0) += 1;
        }
    }

    pub fn host_failure_count(&self, host: &str) -> u32 {
        *self.host_failures.lock().get(host).unwrap_or(&0)
    }
}
