//! Registry handing out one breaker per host.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::breaker::{Breaker, BreakerSnapshot};
use crate::config::BreakerConfig;

/// Owns the per-host breakers. The map lock is held only for
/// lookup/insert; per-host state has its own lock inside [`Breaker`].
pub struct BreakerRegistry {
    config: Arc<BreakerConfig>,
    breakers: Mutex<HashMap<String, Arc<Breaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// The breaker for `host`, created on first use.
    pub fn breaker(&self, host: &str) -> Arc<Breaker> {
        let mut map = self.breakers.lock();
        Arc::clone(
            map.entry(host.to_string())
                .or_insert_with(|| Arc::new(Breaker::new(host.to_string(), Arc::clone(&self.config)))),
        )
    }

    /// Whether `host` currently rejects calls.
    pub fn is_open(&self, host: &str) -> bool {
        let existing = { self.breakers.lock().get(host).cloned() };
        match existing {
            Some(b) => b.try_is_open(),
            None => false,
        }
    }

    /// Snapshots every known breaker, for diagnostics and the CLI.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<Breaker>> = { self.breakers.lock().values().cloned().collect() };
        let mut snaps: Vec<_> = breakers.iter().map(|b| b.snapshot()).collect();
        snaps.sort_by(|a, b| a.host.cmp(&b.host));
        snaps
    }

    /// Resets every breaker to CLOSED.
    pub fn reset_all(&self) {
        let breakers: Vec<Arc<Breaker>> = { self.breakers.lock().values().cloned().collect() };
        for b in breakers {
            b.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.lock().is_empty()
    }
}

impl Breaker {
    fn try_is_open(&self) -> bool {
        matches!(self.state(), crate::breaker::CircuitState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CircuitState;
    use std::time::Duration;

    fn registry() -> BreakerRegistry {
        BreakerConfig::builder()
            .failure_threshold(2)
            .recovery_timeout(Duration::from_secs(60))
            .build()
    }

    #[test]
    fn breakers_are_per_host() {
        let registry = registry();
        let a = registry.breaker("a.example.test:443");
        a.record_failure();
        a.record_failure();
        assert_eq!(a.state(), CircuitState::Open);

        let b = registry.breaker("b.example.test:443");
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn same_host_shares_a_breaker() {
        let registry = registry();
        registry.breaker("a.example.test:443").record_failure();
        assert_eq!(
            registry.breaker("a.example.test:443").snapshot().failure_count,
            1
        );
    }

    #[test]
    fn is_open_does_not_create_breakers() {
        let registry = registry();
        assert!(!registry.is_open("ghost.example.test:443"));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_sorted_by_host() {
        let registry = registry();
        registry.breaker("b.example.test:443");
        registry.breaker("a.example.test:443");
        let snaps = registry.snapshot();
        assert_eq!(snaps[0].host, "a.example.test:443");
        assert_eq!(snaps[1].host, "b.example.test:443");
    }

    #[test]
    fn reset_all_closes_everything() {
        let registry = registry();
        let a = registry.breaker("a.example.test:443");
        a.record_failure();
        a.record_failure();
        assert_eq!(a.state(), CircuitState::Open);
        registry.reset_all();
        assert_eq!(a.state(), CircuitState::Closed);
    }
}
