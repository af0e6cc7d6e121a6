//! The per-host breaker state machine.

use std::sync::Arc;
use std::time::Instant;

use fetchkit_core::FetchError;
use parking_lot::Mutex;

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::config::BreakerConfig;
use crate::events::BreakerEvent;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow; failures count against the threshold.
    Closed,
    /// Calls are rejected until the recovery timeout passes.
    Open,
    /// Probes are allowed; their outcomes decide the next state.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one breaker, as the registry exposes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub host: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_successes: u32,
    pub transitions: u64,
    pub times_opened: u64,
    pub seconds_since_transition: u64,
}

struct Core {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    last_transition: Instant,
    transitions: u64,
    times_opened: u64,
}

impl Core {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            last_failure: None,
            last_transition: Instant::now(),
            transitions: 0,
            times_opened: 0,
        }
    }
}

/// One host's breaker. Shared behind `Arc` by the registry; all state
/// sits under a single short-lived lock, never held across an await.
pub struct Breaker {
    host: String,
    config: Arc<BreakerConfig>,
    core: Mutex<Core>,
}

impl Breaker {
    pub(crate) fn new(host: String, config: Arc<BreakerConfig>) -> Self {
        Self {
            host,
            config,
            core: Mutex::new(Core::new()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn state(&self) -> CircuitState {
        let mut core = self.core.lock();
        self.refresh(&mut core);
        core.state
    }

    /// Asks permission to issue a call. `Err(CircuitOpen)` while open.
    pub fn try_acquire(&self) -> Result<(), FetchError> {
        let mut core = self.core.lock();
        self.refresh(&mut core);
        match core.state {
            CircuitState::Closed | CircuitState::HalfOpen => {
                self.config
                    .event_listeners
                    .emit(&BreakerEvent::CallPermitted {
                        host: self.host.clone(),
                        timestamp: Instant::now(),
                        state: core.state,
                    });
                Ok(())
            }
            CircuitState::Open => {
                self.config
                    .event_listeners
                    .emit(&BreakerEvent::CallRejected {
                        host: self.host.clone(),
                        timestamp: Instant::now(),
                    });

                #[cfg(feature = "metrics")]
                counter!("fetchkit_breaker_rejected_total", "host" => self.host.clone())
                    .increment(1);

                Err(FetchError::CircuitOpen {
                    host: self.host.clone(),
                })
            }
        }
    }

    /// Moves OPEN to HALF_OPEN once the recovery timeout has elapsed.
    fn refresh(&self, core: &mut Core) {
        if core.state == CircuitState::Open {
            let since_failure = core
                .last_failure
                .map(|t| t.elapsed())
                .unwrap_or_else(|| core.last_transition.elapsed());
            if since_failure >= self.config.recovery_timeout {
                self.transition(core, CircuitState::HalfOpen);
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut core = self.core.lock();
        match core.state {
            CircuitState::Closed => {
                // Leaky healing: successes pay failures back down.
                core.failure_count = core.failure_count.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                core.half_open_successes += 1;
                if core.half_open_successes >= self.config.success_threshold {
                    self.transition(&mut core, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
        self.config
            .event_listeners
            .emit(&BreakerEvent::SuccessRecorded {
                host: self.host.clone(),
                timestamp: Instant::now(),
                state: core.state,
            });
    }

    /// Records a failed call that [`BreakerConfig::counts_as_failure`]
    /// has already classified.
    pub fn record_failure(&self) {
        let mut core = self.core.lock();
        core.last_failure = Some(Instant::now());
        match core.state {
            CircuitState::Closed => {
                core.failure_count += 1;
                if core.failure_count >= self.config.failure_threshold {
                    self.transition(&mut core, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut core, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
        self.config
            .event_listeners
            .emit(&BreakerEvent::FailureRecorded {
                host: self.host.clone(),
                timestamp: Instant::now(),
                failure_count: core.failure_count,
            });
    }

    /// Applies a call outcome: classifies the error (if any) and feeds
    /// the right counter. Non-failures (4xx, cancellation) leave the
    /// breaker untouched.
    pub fn observe(&self, error: Option<&FetchError>) {
        match error {
            None => self.record_success(),
            Some(e) if self.config.counts_as_failure(e) => self.record_failure(),
            Some(_) => {}
        }
    }

    pub fn force_open(&self) {
        let mut core = self.core.lock();
        core.last_failure = Some(Instant::now());
        self.transition(&mut core, CircuitState::Open);
    }

    pub fn reset(&self) {
        let mut core = self.core.lock();
        self.transition(&mut core, CircuitState::Closed);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut core = self.core.lock();
        self.refresh(&mut core);
        BreakerSnapshot {
            host: self.host.clone(),
            state: core.state,
            failure_count: core.failure_count,
            half_open_successes: core.half_open_successes,
            transitions: core.transitions,
            times_opened: core.times_opened,
            seconds_since_transition: core.last_transition.elapsed().as_secs(),
        }
    }

    fn transition(&self, core: &mut Core, to: CircuitState) {
        if core.state == to {
            return;
        }
        let from = core.state;
        core.state = to;
        core.last_transition = Instant::now();
        core.transitions += 1;
        if to == CircuitState::Open {
            core.times_opened += 1;
        }
        core.failure_count = 0;
        core.half_open_successes = 0;

        tracing::info!(host = %self.host, from = %from, to = %to, "circuit state transition");

        #[cfg(feature = "metrics")]
        counter!(
            "fetchkit_breaker_transitions_total",
            "host" => self.host.clone(),
            "to" => to.to_string()
        )
        .increment(1);

        self.config
            .event_listeners
            .emit(&BreakerEvent::StateTransition {
                host: self.host.clone(),
                timestamp: Instant::now(),
                from,
                to,
            });
    }
}
