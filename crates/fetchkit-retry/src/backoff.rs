//! Backoff computation.

use std::time::Duration;

use fetchkit_core::{ErrorCategory, FetchError};
use rand::Rng;

/// Delay growth strategy across attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// `base` every time.
    Fixed,
    /// `base · (n + 1)`.
    Linear,
    /// `base · 2^n`.
    #[default]
    Exponential,
    /// Exponential, scaled by the error category and how unhealthy the
    /// host has been.
    Adaptive,
}

/// Error-category multiplier for the adaptive strategy: rate limits
/// back off hardest, plain network flakes the least.
pub(crate) fn category_multiplier(category: ErrorCategory) -> f64 {
    match category {
        ErrorCategory::RateLimit => 2.0,
        ErrorCategory::ServerError => 1.5,
        ErrorCategory::Timeout => 1.2,
        _ => 1.0,
    }
}

/// Multiplier derived from a host's consecutive failures, capped so a
/// long outage cannot push delays to absurdity.
pub(crate) fn host_multiplier(consecutive_failures: u32) -> f64 {
    1.0 + 0.5 * f64::from(consecutive_failures.min(6))
}

/// Computes the delay before retry attempt `attempt` (0-based).
///
/// Order of operations: strategy curve, clamp to `max_delay`, then a
/// server `Retry-After` raises the result from below, then jitter of
/// ±`jitter_factor · delay` is applied.
pub(crate) fn compute_delay(
    strategy: BackoffStrategy,
    base: Duration,
    max: Duration,
    jitter_factor: f64,
    attempt: u32,
    error: &FetchError,
    host_failures: u32,
) -> Duration {
    let exp = |n: u32| base.as_secs_f64() * 2f64.powi(n.min(32) as i32);
    let raw = match strategy {
        BackoffStrategy::Fixed => base.as_secs_f64(),
        BackoffStrategy::Linear => base.as_secs_f64() * f64::from(attempt + 1),
        BackoffStrategy::Exponential => exp(attempt),
        BackoffStrategy::Adaptive => {
            exp(attempt) * category_multiplier(error.category()) * host_multiplier(host_failures)
        }
    };

    let mut delay = raw.min(max.as_secs_f64());

    if let Some(retry_after) = error.retry_after() {
        delay = delay.max(retry_after.as_secs_f64());
    }

    if jitter_factor > 0.0 {
        let jitter = rand::thread_rng().gen_range(-jitter_factor..=jitter_factor);
        delay *= 1.0 + jitter;
    }

    Duration::from_secs_f64(delay.max(0.0))
}
