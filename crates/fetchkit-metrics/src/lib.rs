//! Request and transfer metrics.
//!
//! The collector keeps a bounded history of request records (default
//! 10 000), evicts entries older than the retention window, and
//! aggregates on demand: totals, success rate, latency percentiles
//! over a bounded sample, per-host and per-status breakdowns, and
//! requests-per-second. Streaming transfers feed a parallel record
//! stream that rolls up into the same snapshot.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use fetchkit_core::ErrorCategory;
use parking_lot::Mutex;

/// Collector configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Bounded request-history length.
    pub max_history: usize,
    /// Records older than this are evicted.
    pub retention: Duration,
    /// Upper bound on the sample used for percentiles.
    pub percentile_sample: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_history: 10_000,
            retention: Duration::from_secs(24 * 3600),
            percentile_sample: 1_000,
        }
    }
}

/// One request's outcome.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub url: String,
    pub host: String,
    pub method: String,
    pub status: Option<u16>,
    pub response_time: Duration,
    pub size: usize,
    pub error: Option<ErrorCategory>,
    pub at: Instant,
}

/// One streaming transfer's outcome.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub url: String,
    pub operation: String,
    pub bytes: u64,
    pub duration: Duration,
    pub chunk_size: usize,
    pub reused_connection: bool,
    pub error: Option<ErrorCategory>,
    pub at: Instant,
}

/// Per-host rollup inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_time_ms: u64,
}

impl HostStats {
    pub fn avg_response_ms(&self) -> u64 {
        if self.requests == 0 {
            0
        } else {
            self.total_time_ms / self.requests
        }
    }
}

/// Aggregated view of everything recorded so far.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSnapshot {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub avg_response_time: Duration,
    pub requests_per_second: f64,
    pub per_host: BTreeMap<String, HostStats>,
    pub per_status: BTreeMap<u16, u64>,
    pub per_error: BTreeMap<String, u64>,
    pub transfers: u64,
    pub bytes_transferred: u64,
}

struct Inner {
    history: VecDeque<RequestRecord>,
    transfers: VecDeque<TransferRecord>,
}

/// The metrics collector. One per engine; internally synchronized.
pub struct MetricsCollector {
    config: MetricsConfig,
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                history: VecDeque::new(),
                transfers: VecDeque::new(),
            }),
        }
    }

    pub fn record_request(&self, record: RequestRecord) {
        let mut inner = self.inner.lock();
        inner.history.push_back(record);
        let max = self.config.max_history;
        while inner.history.len() > max {
            inner.history.pop_front();
        }
        self.evict_expired(&mut inner);
    }

    pub fn record_transfer(&self, record: TransferRecord) {
        let mut inner = self.inner.lock();
        inner.transfers.push_back(record);
        let max = self.config.max_history;
        while inner.transfers.len() > max {
            inner.transfers.pop_front();
        }
    }

    fn evict_expired(&self, inner: &mut Inner) {
        let retention = self.config.retention;
        while inner
            .history
            .front()
            .is_some_and(|r| r.at.elapsed() > retention)
        {
            inner.history.pop_front();
        }
        while inner
            .transfers
            .front()
            .is_some_and(|r| r.at.elapsed() > retention)
        {
            inner.transfers.pop_front();
        }
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let mut inner = self.inner.lock();
        self.evict_expired(&mut inner);

        let total = inner.history.len() as u64;
        let successful = inner
            .history
            .iter()
            .filter(|r| r.error.is_none() && r.status.is_some_and(|s| (200..300).contains(&s)))
            .count() as u64;
        let failed = total - successful;

        let mut per_host: BTreeMap<String, HostStats> = BTreeMap::new();
        let mut per_status: BTreeMap<u16, u64> = BTreeMap::new();
        let mut per_error: BTreeMap<String, u64> = BTreeMap::new();
        let mut total_time = Duration::ZERO;

        for record in &inner.history {
            let host = per_host.entry(record.host.clone()).or_default();
            host.requests += 1;
            host.total_time_ms += record.response_time.as_millis() as u64;
            if record.error.is_none() && record.status.is_some_and(|s| (200..300).contains(&s)) {
                host.successes += 1;
            } else {
                host.failures += 1;
            }
            if let Some(status) = record.status {
                *per_status.entry(status).or_insert(0) += 1;
            }
            if let Some(category) = record.error {
                *per_error.entry(category.to_string()).or_insert(0) += 1;
            }
            total_time += record.response_time;
        }

        // Percentiles over a bounded tail sample.
        let sample_len = inner.history.len().min(self.config.percentile_sample);
        let mut sample: Vec<Duration> = inner
            .history
            .iter()
            .rev()
            .take(sample_len)
            .map(|r| r.response_time)
            .collect();
        sample.sort();

        let span = match (inner.history.front(), inner.history.back()) {
            (Some(first), Some(last)) => last
                .at
                .duration_since(first.at)
                .as_secs_f64()
                .max(f64::EPSILON),
            _ => f64::EPSILON,
        };
        let requests_per_second = if total > 1 { total as f64 / span } else { 0.0 };

        let bytes_transferred =
            inner.transfers.iter().map(|t| t.bytes).sum::<u64>()
                + inner.history.iter().map(|r| r.size as u64).sum::<u64>();

        PerformanceSnapshot {
            total_requests: total,
            successful,
            failed,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
            p50: percentile(&sample, 0.50),
            p90: percentile(&sample, 0.90),
            p95: percentile(&sample, 0.95),
            p99: percentile(&sample, 0.99),
            avg_response_time: if total == 0 {
                Duration::ZERO
            } else {
                total_time / total as u32
            },
            requests_per_second,
            per_host,
            per_status,
            per_error,
            transfers: inner.transfers.len() as u64,
            bytes_transferred,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.history.clear();
        inner.transfers.clear();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

/// Nearest-rank percentile over a sorted sample.
fn percentile(sorted: &[Duration], q: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((sorted.len() as f64) * q).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
