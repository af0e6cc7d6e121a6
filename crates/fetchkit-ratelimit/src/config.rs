//! Rate limiter configuration, algorithms, and strategy presets.

use std::time::Duration;

use fetchkit_core::events::{EventListeners, FnListener};

use crate::events::RateLimitEvent;

/// Admission algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Continuous refill with a burst allowance.
    #[default]
    TokenBucket,
    /// Exact timestamps over the trailing window; FIFO by admit time.
    SlidingWindow,
    /// Counter reset at window boundaries.
    FixedWindow,
    /// Queue level drained at a constant rate.
    LeakyBucket,
    /// Token bucket whose rate and delays follow observed outcomes and
    /// server hints.
    Adaptive,
}

/// Preset postures mapped onto base rate and burst headroom, applied by
/// [`RateLimitConfigBuilder::strategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
    /// Forces the adaptive algorithm on top of balanced numbers.
    Adaptive,
}

/// Configuration for [`crate::RateLimiter`].
#[derive(Clone)]
pub struct RateLimitConfig {
    pub algorithm: Algorithm,
    /// Sustained admissions per second per host.
    pub requests_per_second: f64,
    /// Burst capacity (token and leaky bucket).
    pub burst_size: usize,
    /// Window length for the windowed algorithms.
    pub window: Duration,
    /// Honor server-declared limits by capping at 80% of them.
    pub respect_server_limits: bool,
    /// Step size for adaptive rate adjustment.
    pub adaptive_factor: f64,
    pub min_requests_per_second: f64,
    pub max_requests_per_second: f64,
    pub(crate) name: String,
    pub(crate) event_listeners: EventListeners<RateLimitEvent>,
}

impl RateLimitConfig {
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::new()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfigBuilder::new().build_config()
    }
}

/// Builder for [`RateLimitConfig`].
///
/// Defaults: token bucket, 10 rps, burst 20, 60 s window, server limits
/// respected, adaptive factor 0.1, rate clamped to [1, 100] rps.
pub struct RateLimitConfigBuilder {
    algorithm: Algorithm,
    requests_per_second: f64,
    burst_size: usize,
    window: Duration,
    respect_server_limits: bool,
    adaptive_factor: f64,
    min_requests_per_second: f64,
    max_requests_per_second: f64,
    name: String,
    event_listeners: EventListeners<RateLimitEvent>,
}

impl Default for RateLimitConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitConfigBuilder {
    pub fn new() -> Self {
        Self {
            algorithm: Algorithm::TokenBucket,
            requests_per_second: 10.0,
            burst_size: 20,
            window: Duration::from_secs(60),
            respect_server_limits: true,
            adaptive_factor: 0.1,
            min_requests_per_second: 1.0,
            max_requests_per_second: 100.0,
            name: "<unnamed>".to_string(),
            event_listeners: EventListeners::new(),
        }
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Applies a posture preset: conservative 5 rps with ×1.5 burst,
    /// balanced 10 rps ×2, aggressive 20 rps ×3. `Adaptive` keeps the
    /// balanced numbers and switches the algorithm.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        let (rps, burst_multiplier) = match strategy {
            Strategy::Conservative => (5.0, 1.5),
            Strategy::Balanced => (10.0, 2.0),
            Strategy::Aggressive => (20.0, 3.0),
            Strategy::Adaptive => {
                self.algorithm = Algorithm::Adaptive;
                (10.0, 2.0)
            }
        };
        self.requests_per_second = rps;
        self.burst_size = (rps * burst_multiplier).ceil() as usize;
        self
    }

    pub fn requests_per_second(mut self, rps: f64) -> Self {
        self.requests_per_second = rps.max(0.001);
        self
    }

    pub fn burst_size(mut self, burst: usize) -> Self {
        self.burst_size = burst.max(1);
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn respect_server_limits(mut self, yes: bool) -> Self {
        self.respect_server_limits = yes;
        self
    }

    pub fn adaptive_factor(mut self, factor: f64) -> Self {
        self.adaptive_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn rate_bounds(mut self, min_rps: f64, max_rps: f64) -> Self {
        self.min_requests_per_second = min_rps.max(0.001);
        self.max_requests_per_second = max_rps.max(self.min_requests_per_second);
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Callback when an admission had to wait `(host, delay)`.
    pub fn on_delayed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RateLimitEvent::Delayed { host, delay, .. } = event {
                f(host, *delay);
            }
        }));
        self
    }

    /// Callback when a host's effective rate changes `(host, rps)`.
    pub fn on_rate_adjusted<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, f64) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RateLimitEvent::RateAdjusted { host, rps, .. } = event {
                f(host, *rps);
            }
        }));
        self
    }

    pub fn build_config(self) -> RateLimitConfig {
        RateLimitConfig {
            algorithm: self.algorithm,
            requests_per_second: self.requests_per_second,
            burst_size: self.burst_size,
            window: self.window,
            respect_server_limits: self.respect_server_limits,
            adaptive_factor: self.adaptive_factor,
            min_requests_per_second: self.min_requests_per_second,
            max_requests_per_second: self.max_requests_per_second,
            name: self.name,
            event_listeners: self.event_listeners,
        }
    }

    pub fn build(self) -> crate::RateLimiter {
        crate::RateLimiter::new(self.build_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.algorithm, Algorithm::TokenBucket);
        assert_eq!(config.requests_per_second, 10.0);
        assert_eq!(config.burst_size, 20);
        assert!(config.respect_server_limits);
    }

    #[test]
    fn strategy_presets() {
        let conservative = RateLimitConfig::builder()
            .strategy(Strategy::Conservative)
            .build_config();
        assert_eq!(conservative.requests_per_second, 5.0);
        assert_eq!(conservative.burst_size, 8);

        let aggressive = RateLimitConfig::builder()
            .strategy(Strategy::Aggressive)
            .build_config();
        assert_eq!(aggressive.requests_per_second, 20.0);
        assert_eq!(aggressive.burst_size, 60);

        let adaptive = RateLimitConfig::builder()
            .strategy(Strategy::Adaptive)
            .build_config();
        assert_eq!(adaptive.algorithm, Algorithm::Adaptive);
    }

    #[test]
    fn bounds_are_sane() {
        let config = RateLimitConfig::builder()
            .requests_per_second(0.0)
            .burst_size(0)
            .rate_bounds(5.0, 2.0)
            .build_config();
        assert!(config.requests_per_second > 0.0);
        assert_eq!(config.burst_size, 1);
        assert!(config.max_requests_per_second >= config.min_requests_per_second);
    }
}
