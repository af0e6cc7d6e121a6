//! Rate limiter events.

use std::time::{Duration, Instant};

use fetchkit_core::events::EngineEvent;

#[derive(Debug, Clone)]
pub enum RateLimitEvent {
    /// A request was admitted, after `waited` total delay.
    Admitted {
        host: String,
        timestamp: Instant,
        waited: Duration,
    },
    /// An admission attempt must wait `delay` before retrying.
    Delayed {
        host: String,
        timestamp: Instant,
        delay: Duration,
    },
    /// The server declared a limit that is now being honored.
    ServerLimitObserved {
        host: String,
        timestamp: Instant,
        server_rps: f64,
    },
    /// The host's effective rate changed (adaptive or server-driven).
    RateAdjusted {
        host: String,
        timestamp: Instant,
        rps: f64,
    },
}

impl EngineEvent for RateLimitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RateLimitEvent::Admitted { .. } => "admitted",
            RateLimitEvent::Delayed { .. } => "delayed",
            RateLimitEvent::ServerLimitObserved { .. } => "server_limit_observed",
            RateLimitEvent::RateAdjusted { .. } => "rate_adjusted",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RateLimitEvent::Admitted { timestamp, .. }
            | RateLimitEvent::Delayed { timestamp, .. }
            | RateLimitEvent::ServerLimitObserved { timestamp, .. }
            | RateLimitEvent::RateAdjusted { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            RateLimitEvent::Admitted { host, .. }
            | RateLimitEvent::Delayed { host, .. }
            | RateLimitEvent::ServerLimitObserved { host, .. }
            | RateLimitEvent::RateAdjusted { host, .. } => host,
        }
    }
}
