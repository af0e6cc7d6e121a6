//! Per-host admission state, one variant per algorithm.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::{Algorithm, RateLimitConfig};

/// Outcome of one admission attempt. `Admitted` has consumed capacity;
/// `Wait` has not (tokens are only consumed on admit).
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Admission {
    Admitted,
    Wait(Duration),
}

#[derive(Debug)]
enum AlgorithmState {
    TokenBucket {
        tokens: f64,
        last_refill: Instant,
    },
    SlidingWindow {
        admitted: VecDeque<Instant>,
    },
    FixedWindow {
        window_start: Instant,
        count: usize,
    },
    LeakyBucket {
        level: f64,
        last_drain: Instant,
    },
}

/// All mutable per-host limiter state. Guarded by the per-host lock in
/// the limiter; nothing here blocks.
#[derive(Debug)]
pub(crate) struct HostState {
    /// Effective sustained rate, adjusted by server hints and the
    /// adaptive feedback loop.
    pub rps: f64,
    pub consecutive_failures: u32,
    pub server_rps: Option<f64>,
    pub server_reset: Option<Instant>,
    algorithm: AlgorithmState,
    adaptive: bool,
}

impl HostState {
    pub fn new(config: &RateLimitConfig) -> Self {
        let now = Instant::now();
        let (algorithm, adaptive) = match config.algorithm {
            Algorithm::TokenBucket => (
                AlgorithmState::TokenBucket {
                    tokens: config.burst_size as f64,
                    last_refill: now,
                },
                false,
            ),
            Algorithm::Adaptive => (
                AlgorithmState::TokenBucket {
                    tokens: config.burst_size as f64,
                    last_refill: now,
                },
                true,
            ),
            Algorithm::SlidingWindow => (
                AlgorithmState::SlidingWindow {
                    admitted: VecDeque::new(),
                },
                false,
            ),
            Algorithm::FixedWindow => (
                AlgorithmState::FixedWindow {
                    window_start: now,
                    count: 0,
                },
                false,
            ),
            Algorithm::LeakyBucket => (
                AlgorithmState::LeakyBucket {
                    level: 0.0,
                    last_drain: now,
                },
                false,
            ),
        };
        Self {
            rps: config.requests_per_second,
            consecutive_failures: 0,
            server_rps: None,
            server_reset: None,
            algorithm,
            adaptive,
        }
    }

    /// Tokens currently available, where the algorithm has that notion.
    pub fn tokens_available(&self) -> Option<f64> {
        match &self.algorithm {
            AlgorithmState::TokenBucket { tokens, .. } => Some(*tokens),
            _ => None,
        }
    }

    /// One admission attempt at `now`.
    pub fn poll(&mut self, config: &RateLimitConfig, now: Instant) -> Admission {
        // A server-declared reset deadline trumps local accounting for
        // the adaptive algorithm.
        if self.adaptive {
            if let Some(reset) = self.server_reset {
                if reset > now {
                    return Admission::Wait(reset - now);
                }
                self.server_reset = None;
            }
        }

        let rps = self.rps;
        match &mut self.algorithm {
            AlgorithmState::TokenBucket {
                tokens,
                last_refill,
            } => {
                let elapsed = now.duration_since(*last_refill).as_secs_f64();
                *tokens = (*tokens + elapsed * rps).min(config.burst_size as f64);
                *last_refill = now;
                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    Admission::Admitted
                } else {
                    let mut delay = (1.0 - *tokens) / rps;
                    if self.adaptive {
                        delay *= 1.5_f64.powi(self.consecutive_failures.min(16) as i32);
                    }
                    Admission::Wait(Duration::from_secs_f64(delay))
                }
            }
            AlgorithmState::SlidingWindow { admitted } => {
                let window = config.window;
                while let Some(&front) = admitted.front() {
                    if now.duration_since(front) >= window {
                        admitted.pop_front();
                    } else {
                        break;
                    }
                }
                let capacity = window_capacity(rps, window);
                if admitted.len() < capacity {
                    admitted.push_back(now);
                    Admission::Admitted
                } else {
                    match admitted.front() {
                        Some(front) => {
                            Admission::Wait((*front + window).saturating_duration_since(now))
                        }
                        None => {
                            admitted.push_back(now);
                            Admission::Admitted
                        }
                    }
                }
            }
            AlgorithmState::FixedWindow {
                window_start,
                count,
            } => {
                let window = config.window;
                if now.duration_since(*window_start) >= window {
                    *window_start = now;
                    *count = 0;
                }
                let capacity = window_capacity(rps, window);
                if *count < capacity {
                    *count += 1;
                    Admission::Admitted
                } else {
                    Admission::Wait((*window_start + window).saturating_duration_since(now))
                }
            }
            AlgorithmState::LeakyBucket { level, last_drain } => {
                let elapsed = now.duration_since(*last_drain).as_secs_f64();
                *level = (*level - elapsed * rps).max(0.0);
                *last_drain = now;
                let capacity = config.burst_size as f64;
                if *level < capacity {
                    *level += 1.0;
                    Admission::Admitted
                } else {
                    Admission::Wait(Duration::from_secs_f64((*level + 1.0 - capacity) / rps))
                }
            }
        }
    }
}

fn window_capacity(rps: f64, window: Duration) -> usize {
    ((rps * window.as_secs_f64()).floor() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;

    fn config(algorithm: Algorithm, rps: f64, burst: usize, window: Duration) -> RateLimitConfig {
        RateLimitConfig::builder()
            .algorithm(algorithm)
            .requests_per_second(rps)
            .burst_size(burst)
            .window(window)
            .build_config()
    }

    #[test]
    fn token_bucket_burst_then_delay() {
        let config = config(Algorithm::TokenBucket, 10.0, 3, Duration::from_secs(1));
        let mut state = HostState::new(&config);
        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(state.poll(&config, now), Admission::Admitted);
        }
        match state.poll(&config, now) {
            Admission::Wait(delay) => {
                // One token at 10 rps is 100 ms away.
                assert!(delay <= Duration::from_millis(101), "delay = {delay:?}");
                assert!(delay >= Duration::from_millis(80), "delay = {delay:?}");
            }
            other => panic!("expected wait, got {other:?}"),
        }
    }

    #[test]
    fn token_bucket_refills_over_time() {
        let config = config(Algorithm::TokenBucket, 1000.0, 2, Duration::from_secs(1));
        let mut state = HostState::new(&config);
        let t0 = Instant::now();
        assert_eq!(state.poll(&config, t0), Admission::Admitted);
        assert_eq!(state.poll(&config, t0), Admission::Admitted);
        assert!(matches!(state.poll(&config, t0), Admission::Wait(_)));
        // 5 ms at 1000 rps refills 5 tokens, clamped to burst 2.
        let later = t0 + Duration::from_millis(5);
        assert_eq!(state.poll(&config, later), Admission::Admitted);
        assert_eq!(state.poll(&config, later), Admission::Admitted);
    }

    #[test]
    fn sliding_window_delays_until_oldest_leaves() {
        let window = Duration::from_millis(100);
        let config = config(Algorithm::SlidingWindow, 20.0, 1, window);
        let mut state = HostState::new(&config);
        let t0 = Instant::now();
        // capacity = 20 * 0.1 = 2
        assert_eq!(state.poll(&config, t0), Admission::Admitted);
        assert_eq!(state.poll(&config, t0), Admission::Admitted);
        match state.poll(&config, t0) {
            Admission::Wait(delay) => assert!(delay <= window),
            other => panic!("expected wait, got {other:?}"),
        }
        // After the window passes, the oldest entries expire.
        let later = t0 + window + Duration::from_millis(1);
        assert_eq!(state.poll(&config, later), Admission::Admitted);
    }

    #[test]
    fn fixed_window_resets_at_boundary() {
        let window = Duration::from_millis(50);
        let config = config(Algorithm::FixedWindow, 40.0, 1, window);
        let mut state = HostState::new(&config);
        let t0 = Instant::now();
        // capacity = 40 * 0.05 = 2
        assert_eq!(state.poll(&config, t0), Admission::Admitted);
        assert_eq!(state.poll(&config, t0), Admission::Admitted);
        assert!(matches!(state.poll(&config, t0), Admission::Wait(_)));
        let next_window = t0 + window + Duration::from_millis(1);
        assert_eq!(state.poll(&config, next_window), Admission::Admitted);
    }

    #[test]
    fn leaky_bucket_caps_queue_level() {
        let config = config(Algorithm::LeakyBucket, 10.0, 2, Duration::from_secs(1));
        let mut state = HostState::new(&config);
        let t0 = Instant::now();
        assert_eq!(state.poll(&config, t0), Admission::Admitted);
        assert_eq!(state.poll(&config, t0), Admission::Admitted);
        assert!(matches!(state.poll(&config, t0), Admission::Wait(_)));
        // Draining at 10 rps frees a slot in 100 ms.
        let later = t0 + Duration::from_millis(150);
        assert_eq!(state.poll(&config, later), Admission::Admitted);
    }

    #[test]
    fn adaptive_backoff_grows_with_failures() {
        let config = config(Algorithm::Adaptive, 10.0, 1, Duration::from_secs(1));
        let mut state = HostState::new(&config);
        let t0 = Instant::now();
        assert_eq!(state.poll(&config, t0), Admission::Admitted);
        let base = match state.poll(&config, t0) {
            Admission::Wait(d) => d,
            other => panic!("expected wait, got {other:?}"),
        };
        state.consecutive_failures = 2;
        let backed_off = match state.poll(&config, t0) {
            Admission::Wait(d) => d,
            other => panic!("expected wait, got {other:?}"),
        };
        // 1.5^2 = 2.25x the base delay.
        assert!(backed_off > base.mul_f64(2.0));
        assert!(backed_off < base.mul_f64(2.5));
    }

    #[test]
    fn adaptive_honors_server_reset() {
        let config = config(Algorithm::Adaptive, 100.0, 10, Duration::from_secs(1));
        let mut state = HostState::new(&config);
        let now = Instant::now();
        state.server_reset = Some(now + Duration::from_secs(2));
        match state.poll(&config, now) {
            Admission::Wait(delay) => {
                assert!(delay >= Duration::from_millis(1900));
            }
            other => panic!("expected wait, got {other:?}"),
        }
        // Past the deadline, tokens flow again.
        let later = now + Duration::from_secs(3);
        assert_eq!(state.poll(&config, later), Admission::Admitted);
    }
}
