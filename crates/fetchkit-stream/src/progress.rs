//! Progress reporting for streaming transfers.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// A point-in-time transfer report, emitted at least every 100 ms while
/// bytes are flowing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    /// Instantaneous rate in bytes/second.
    pub rate: f64,
    pub elapsed: Duration,
    pub eta: Option<Duration>,
    pub current_file: String,
}

impl ProgressInfo {
    /// Completion in percent when the total is known.
    pub fn percent(&self) -> Option<f64> {
        self.total_bytes.filter(|t| *t > 0).map(|total| {
            (self.bytes_transferred as f64 / total as f64 * 100.0).min(100.0)
        })
    }
}

/// Callback invoked with progress updates.
pub type ProgressCallback = Arc<dyn Fn(&ProgressInfo) + Send + Sync>;

/// Tracks emission cadence and rate computation for one transfer.
pub(crate) struct ProgressTracker {
    started: Instant,
    last_emit: Instant,
    last_rate_at: Instant,
    bytes_at_last_rate: u64,
    rate: f64,
    interval: Duration,
    file_label: String,
    total: Option<u64>,
}

impl ProgressTracker {
    pub fn new(interval: Duration, file_label: String, total: Option<u64>, resumed: u64) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_emit: now - interval, // emit on the first chunk
            last_rate_at: now,
            bytes_at_last_rate: resumed,
            rate: 0.0,
            interval,
            file_label,
            total,
        }
    }

    /// Updates the rate estimate; recomputed at most once a second so a
    /// slow tick cannot swing it wildly.
    pub fn update_rate(&mut self, bytes: u64) -> f64 {
        let since = self.last_rate_at.elapsed();
        if since >= Duration::from_secs(1) {
            let delta = bytes.saturating_sub(self.bytes_at_last_rate);
            self.rate = delta as f64 / since.as_secs_f64();
            self.last_rate_at = Instant::now();
            self.bytes_at_last_rate = bytes;
        } else if self.rate == 0.0 {
            let elapsed = self.started.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                self.rate = bytes as f64 / elapsed;
            }
        }
        self.rate
    }

    /// Emits to the callback if the interval has elapsed.
    pub fn maybe_emit(&mut self, bytes: u64, callback: Option<&ProgressCallback>) {
        let Some(callback) = callback else { return };
        if self.last_emit.elapsed() < self.interval {
            return;
        }
        self.last_emit = Instant::now();
        callback(&self.info(bytes));
    }

    /// Unconditional emission (end of transfer).
    pub fn emit_final(&mut self, bytes: u64, callback: Option<&ProgressCallback>) {
        if let Some(callback) = callback {
            callback(&self.info(bytes));
        }
    }

    fn info(&self, bytes: u64) -> ProgressInfo {
        let eta = self.total.and_then(|total| {
            if self.rate > 0.0 {
                let remaining = total.saturating_sub(bytes);
                Some(Duration::from_secs_f64(remaining as f64 / self.rate))
            } else {
                None
            }
        });
        ProgressInfo {
            bytes_transferred: bytes,
            total_bytes: self.total,
            rate: self.rate,
            elapsed: self.started.elapsed(),
            eta,
            current_file: self.file_label.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn percent_needs_a_total() {
        let info = ProgressInfo {
            bytes_transferred: 50,
            total_bytes: Some(200),
            rate: 0.0,
            elapsed: Duration::ZERO,
            eta: None,
            current_file: "f".into(),
        };
        assert_eq!(info.percent(), Some(25.0));

        let unknown = ProgressInfo {
            total_bytes: None,
            ..info
        };
        assert_eq!(unknown.percent(), None);
    }

    #[test]
    fn emission_respects_the_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback: ProgressCallback = Arc::new(move |_info| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut tracker =
            ProgressTracker::new(Duration::from_millis(50), "f".into(), Some(100), 0);
        tracker.maybe_emit(10, Some(&callback));
        tracker.maybe_emit(20, Some(&callback)); // within interval, suppressed
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        std::thread::sleep(Duration::from_millis(60));
        tracker.maybe_emit(30, Some(&callback));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn eta_comes_from_rate_and_total() {
        let mut tracker = ProgressTracker::new(Duration::ZERO, "f".into(), Some(1_000), 0);
        tracker.rate = 100.0;
        let info = tracker.info(500);
        assert_eq!(info.eta, Some(Duration::from_secs(5)));
    }
}
