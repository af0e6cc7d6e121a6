//! Breaker events.

use std::time::Instant;

use fetchkit_core::events::EngineEvent;

use crate::breaker::CircuitState;

/// Events emitted by a breaker; the `host` is the per-target key.
#[derive(Debug, Clone)]
pub enum BreakerEvent {
    StateTransition {
        host: String,
        timestamp: Instant,
        from: CircuitState,
        to: CircuitState,
    },
    CallPermitted {
        host: String,
        timestamp: Instant,
        state: CircuitState,
    },
    CallRejected {
        host: String,
        timestamp: Instant,
    },
    FailureRecorded {
        host: String,
        timestamp: Instant,
        failure_count: u32,
    },
    SuccessRecorded {
        host: String,
        timestamp: Instant,
        state: CircuitState,
    },
}

impl EngineEvent for BreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BreakerEvent::StateTransition { .. } => "state_transition",
            BreakerEvent::CallPermitted { .. } => "call_permitted",
            BreakerEvent::CallRejected { .. } => "call_rejected",
            BreakerEvent::FailureRecorded { .. } => "failure_recorded",
            BreakerEvent::SuccessRecorded { .. } => "success_recorded",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            BreakerEvent::StateTransition { timestamp, .. }
            | BreakerEvent::CallPermitted { timestamp, .. }
            | BreakerEvent::CallRejected { timestamp, .. }
            | BreakerEvent::FailureRecorded { timestamp, .. }
            | BreakerEvent::SuccessRecorded { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            BreakerEvent::StateTransition { host, .. }
            | BreakerEvent::CallPermitted { host, .. }
            | BreakerEvent::CallRejected { host, .. }
            | BreakerEvent::FailureRecorded { host, .. }
            | BreakerEvent::SuccessRecorded { host, .. } => host,
        }
    }
}
