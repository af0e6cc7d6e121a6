//! Retry controller events.

use std::time::{Duration, Instant};

use fetchkit_core::events::EngineEvent;
use fetchkit_core::ErrorCategory;

#[derive(Debug, Clone)]
pub enum RetryEvent {
    /// A retry is scheduled after `delay`; `attempt` is 1-based.
    Scheduled {
        name: String,
        timestamp: Instant,
        attempt: u32,
        delay: Duration,
        category: ErrorCategory,
    },
    /// The error was non-retryable; it surfaces immediately.
    NonRetryable {
        name: String,
        timestamp: Instant,
        category: ErrorCategory,
    },
    /// Attempts are exhausted; the last error surfaces verbatim.
    Exhausted {
        name: String,
        timestamp: Instant,
        attempts: u32,
    },
}

impl EngineEvent for RetryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RetryEvent::Scheduled { .. } => "retry_scheduled",
            RetryEvent::NonRetryable { .. } => "non_retryable",
            RetryEvent::Exhausted { .. } => "exhausted",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RetryEvent::Scheduled { timestamp, .. }
            | RetryEvent::NonRetryable { timestamp, .. }
            | RetryEvent::Exhausted { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            RetryEvent::Scheduled { name, .. }
            | RetryEvent::NonRetryable { name, .. }
            | RetryEvent::Exhausted { name, .. } => name,
        }
    }
}
