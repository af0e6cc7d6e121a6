//! Breaker configuration and builder.

use std::collections::HashSet;
use std::time::Duration;

use fetchkit_core::events::{EventListeners, FnListener};
use fetchkit_core::{ErrorCategory, FetchError};

use crate::breaker::CircuitState;
use crate::events::BreakerEvent;

/// Configuration shared by every breaker a registry creates.
#[derive(Clone)]
pub struct BreakerConfig {
    /// Consecutive-failure budget before CLOSED trips to OPEN.
    pub failure_threshold: u32,
    /// How long OPEN waits (since the last failure) before probing.
    pub recovery_timeout: Duration,
    /// Consecutive HALF_OPEN successes required to close.
    pub success_threshold: u32,
    /// HTTP statuses that count as failures.
    pub failure_status_codes: HashSet<u16>,
    /// Whether transport-level errors (timeout, network, DNS) count.
    pub count_transport_errors: bool,
    pub(crate) name: String,
    pub(crate) event_listeners: EventListeners<BreakerEvent>,
}

impl BreakerConfig {
    pub fn builder() -> BreakerConfigBuilder {
        BreakerConfigBuilder::new()
    }

    /// Whether this error moves the failure counter.
    ///
    /// Client errors other than 408/429 never count; cancellation never
    /// counts; everything else follows the configured status set and
    /// the transport-error switch.
    pub fn counts_as_failure(&self, error: &FetchError) -> bool {
        if matches!(error, FetchError::Cancelled) {
            return false;
        }
        if let Some(status) = error.status() {
            return self.failure_status_codes.contains(&status);
        }
        self.count_transport_errors
            && matches!(
                error.category(),
                ErrorCategory::Timeout | ErrorCategory::Network | ErrorCategory::Dns
            )
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfigBuilder::new().build_config()
    }
}

/// Builder for [`BreakerConfig`].
///
/// Defaults: failure_threshold 5, recovery_timeout 60 s,
/// success_threshold 3, failure statuses {500, 502, 503, 504},
/// transport errors counted.
pub struct BreakerConfigBuilder {
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    failure_status_codes: HashSet<u16>,
    count_transport_errors: bool,
    name: String,
    event_listeners: EventListeners<BreakerEvent>,
}

impl Default for BreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerConfigBuilder {
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            failure_status_codes: [500, 502, 503, 504].into_iter().collect(),
            count_transport_errors: true,
            name: "<unnamed>".to_string(),
            event_listeners: EventListeners::new(),
        }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    pub fn failure_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.failure_status_codes = codes.into_iter().collect();
        self
    }

    pub fn count_transport_errors(mut self, yes: bool) -> Self {
        self.count_transport_errors = yes;
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Callback on every state transition `(host, from, to)`.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BreakerEvent::StateTransition {
                host, from, to, ..
            } = event
            {
                f(host, *from, *to);
            }
        }));
        self
    }

    /// Callback when a call is rejected because the circuit is open.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BreakerEvent::CallRejected { host, .. } = event {
                f(host);
            }
        }));
        self
    }

    pub fn build_config(self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout,
            success_threshold: self.success_threshold,
            failure_status_codes: self.failure_status_codes,
            count_transport_errors: self.count_transport_errors,
            name: self.name,
            event_listeners: self.event_listeners,
        }
    }

    /// Builds a registry using this configuration.
    pub fn build(self) -> crate::BreakerRegistry {
        crate::BreakerRegistry::new(self.build_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchkit_core::NetworkErrorKind;

    #[test]
    fn failure_classification() {
        let config = BreakerConfig::default();
        assert!(config.counts_as_failure(&FetchError::Server { status: 503 }));
        assert!(config.counts_as_failure(&FetchError::Network {
            kind: NetworkErrorKind::Reset,
            message: String::new()
        }));
        assert!(config.counts_as_failure(&FetchError::Timeout {
            elapsed: Duration::ZERO
        }));
        // 4xx never count by default, 429 included.
        assert!(!config.counts_as_failure(&FetchError::Client { status: 400 }));
        assert!(!config.counts_as_failure(&FetchError::RateLimited { retry_after: None }));
        assert!(!config.counts_as_failure(&FetchError::Cancelled));
        assert!(!config.counts_as_failure(&FetchError::Content {
            message: String::new()
        }));
    }

    #[test]
    fn status_set_is_configurable() {
        let config = BreakerConfig::builder()
            .failure_status_codes([429, 500])
            .build_config();
        assert!(config.counts_as_failure(&FetchError::RateLimited { retry_after: None }));
        assert!(!config.counts_as_failure(&FetchError::Server { status: 502 }));
    }

    #[test]
    fn thresholds_floor_at_one() {
        let config = BreakerConfig::builder()
            .failure_threshold(0)
            .success_threshold(0)
            .build_config();
        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.success_threshold, 1);
    }
}
