//! Parallel batch scheduling with priority admission.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fetchkit_core::{FetchError, FetchRequest, FetchResult};
use tokio::sync::Semaphore;

use crate::engine::Fetcher;

/// Callback invoked as batch items finish: `(completed, total)`.
pub type BatchProgress = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Outcome of a whole batch. One entry per request, in submission
/// order; a single request's failure never disturbs its neighbors.
#[derive(Debug)]
pub struct BatchResult {
    pub results: Vec<FetchResult>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl BatchResult {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }

    fn from_results(results: Vec<FetchResult>, duration: Duration) -> BatchResult {
        let total = results.len();
        let successful = results.iter().filter(|r| r.is_success()).count();
        BatchResult {
            failed: total - successful,
            total,
            successful,
            results,
            duration,
        }
    }
}

/// Heap entry: lower priority rank first, then FIFO by sequence.
struct PriorityRequest {
    rank: u8,
    seq: usize,
    request: FetchRequest,
}

impl PartialEq for PriorityRequest {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for PriorityRequest {}

impl PartialOrd for PriorityRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the smallest (rank, seq)
        // pops first.
        (other.rank, other.seq).cmp(&(self.rank, self.seq))
    }
}

impl Fetcher {
    /// Fetches a batch. With `parallel` set, requests run concurrently
    /// under the engine's concurrency budget and, when the config says
    /// so, are admitted in priority order (High, Normal, Low, FIFO
    /// within a class). Sequential mode preserves submission order.
    pub async fn fetch_batch(
        self: &Arc<Self>,
        requests: Vec<FetchRequest>,
        parallel: bool,
        progress: Option<BatchProgress>,
    ) -> BatchResult {
        let started = Instant::now();
        let total = requests.len();

        if !parallel || total <= 1 {
            let mut results = Vec::with_capacity(total);
            for (done, request) in requests.into_iter().enumerate() {
                results.push(self.fetch_single(request).await);
                if let Some(progress) = &progress {
                    progress(done + 1, total);
                }
            }
            return BatchResult::from_results(results, started.elapsed());
        }

        // Admission order: a min-heap over (priority rank, sequence)
        // when prioritization is on, plain submission order otherwise.
        let mut heap = BinaryHeap::with_capacity(total);
        for (seq, request) in requests.into_iter().enumerate() {
            let rank = if self.config().prioritize_batches {
                request.priority.rank()
            } else {
                0
            };
            heap.push(PriorityRequest { rank, seq, request });
        }

        // The batch gate mirrors the engine budget so tasks are
        // *admitted* (not merely spawned) in heap order.
        let gate = Arc::new(Semaphore::new(self.config().max_concurrent_requests));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(total);

        while let Some(entry) = heap.pop() {
            let permit = match Arc::clone(&gate).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let fetcher = Arc::clone(self);
            let progress = progress.clone();
            let completed = Arc::clone(&completed);
            let seq = entry.seq;
            let request = entry.request;
            handles.push((
                seq,
                tokio::spawn(async move {
                    let result = fetcher.fetch_single(request).await;
                    drop(permit);
                    let done = completed.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                    if let Some(progress) = &progress {
                        progress(done, total);
                    }
                    result
                }),
            ));
        }

        let mut results: Vec<Option<FetchResult>> = (0..total).map(|_| None).collect();
        for (seq, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => FetchResult::failure(
                    "",
                    FetchError::Unknown {
                        message: format!("batch task failed: {join_err}"),
                    },
                    Duration::ZERO,
                ),
            };
            results[seq] = Some(result);
        }

        let results: Vec<FetchResult> = results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    FetchResult::failure("", FetchError::Cancelled, Duration::ZERO)
                })
            })
            .collect();

        BatchResult::from_results(results, started.elapsed())
    }
}
