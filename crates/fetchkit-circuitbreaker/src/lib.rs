//! Per-host circuit breaker.
//!
//! Each host gets a three-state breaker: CLOSED counts failures (and
//! heals on successes), OPEN rejects everything until the recovery
//! timeout has passed since the last failure, HALF_OPEN lets probes
//! through and closes again after enough consecutive successes. The
//! [`BreakerRegistry`] owns one breaker per host and hands out shared
//! references.

mod breaker;
mod config;
mod events;
mod registry;

pub use breaker::{Breaker, BreakerSnapshot, CircuitState};
pub use config::{BreakerConfig, BreakerConfigBuilder};
pub use events::BreakerEvent;
pub use registry::BreakerRegistry;
