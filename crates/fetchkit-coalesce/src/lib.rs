//! In-flight request deduplication.
//!
//! Concurrent fetches with the same [`RequestKey`] collapse to one
//! execution: the first caller becomes the leader and runs the
//! executor; everyone else subscribes to the leader's broadcast and
//! receives a clone of the outcome. A cancelled leader closes the
//! channel, and waiters re-enter arbitration independently — one of
//! them becomes the new leader. A sweeper drops slots older than
//! `max_age` so an orphaned entry cannot wedge a key forever.
//!
//! The pending map is guarded by one mutex held only for arbitration;
//! waiting happens on per-slot broadcast receivers with no lock held.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fetchkit_core::RequestKey;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

#[cfg(feature = "metrics")]
use metrics::counter;

/// Configuration for [`Deduplicator`].
#[derive(Debug, Clone)]
pub struct DedupeConfig {
    /// Age at which a pending slot is swept (leader presumed wedged).
    pub max_age: Duration,
    /// How often the background sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Statistics over the pending map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupeStats {
    pub pending: usize,
    /// Waiter count per pending key.
    pub waiters: Vec<(RequestKey, usize)>,
}

struct Slot<T> {
    tx: broadcast::Sender<T>,
    created: Instant,
    waiters: Arc<AtomicUsize>,
}

/// The deduplicator, generic over the (cloneable) outcome it shares.
pub struct Deduplicator<T: Clone> {
    config: DedupeConfig,
    pending: Mutex<HashMap<RequestKey, Slot<T>>>,
}

enum Role<T> {
    Leader {
        /// Identity of the slot this leader owns; removal is conditional
        /// on it so a swept leader cannot evict a successor's slot.
        token: Arc<AtomicUsize>,
    },
    Waiter {
        rx: broadcast::Receiver<T>,
        waiters: Arc<AtomicUsize>,
    },
}

/// Removes the leader's slot if the leader never completed, so a
/// cancelled leader cannot strand its waiters.
struct LeaderGuard<'a, T: Clone> {
    dedup: &'a Deduplicator<T>,
    key: &'a RequestKey,
    token: Arc<AtomicUsize>,
    armed: bool,
}

impl<T: Clone> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.dedup.remove_if_owner(self.key, &self.token);
        }
    }
}

/// Keeps the waiter count honest even when a waiter is cancelled.
struct WaiterGuard {
    waiters: Arc<AtomicUsize>,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T: Clone> Deduplicator<T> {
    pub fn new(config: DedupeConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `executor` once per key across all concurrent callers and
    /// hands every caller a clone of the outcome.
    ///
    /// The executor is a factory because a caller may need to run it
    /// after all: if the current leader is cancelled or swept, one
    /// waiter is promoted and executes it again.
    pub async fn deduplicate<F, Fut>(&self, key: RequestKey, executor: F) -> T
    where
        F: Fn() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            let role = {
                let mut pending = self.pending.lock();
                match pending.get(&key) {
                    Some(slot) => {
                        slot.waiters.fetch_add(1, Ordering::SeqCst);
                        Role::Waiter {
                            rx: slot.tx.subscribe(),
                            waiters: Arc::clone(&slot.waiters),
                        }
                    }
                    None => {
                        let (tx, _rx) = broadcast::channel(1);
                        let token = Arc::new(AtomicUsize::new(0));
                        pending.insert(
                            key.clone(),
                            Slot {
                                tx,
                                created: Instant::now(),
                                waiters: Arc::clone(&token),
                            },
                        );
                        Role::Leader { token }
                    }
                }
            };

            match role {
                Role::Leader { token } => {
                    #[cfg(feature = "metrics")]
                    counter!("fetchkit_dedupe_requests_total", "role" => "leader").increment(1);

                    let mut guard = LeaderGuard {
                        dedup: self,
                        key: &key,
                        token: Arc::clone(&token),
                        armed: true,
                    };
                    let result = executor().await;
                    guard.armed = false;
                    drop(guard);

                    if let Some(slot) = self.remove_if_owner(&key, &token) {
                        // Waiters may all be gone; a send error is fine.
                        let _ = slot.tx.send(result.clone());
                    }
                    return result;
                }
                Role::Waiter { mut rx, waiters } => {
                    #[cfg(feature = "metrics")]
                    counter!("fetchkit_dedupe_requests_total", "role" => "waiter").increment(1);

                    let _guard = WaiterGuard { waiters };
                    match rx.recv().await {
                        Ok(value) => return value,
                        Err(broadcast::error::RecvError::Closed)
                        | Err(broadcast::error::RecvError::Lagged(_)) => {
                            // Leader cancelled or swept: retry on our own.
                            tracing::debug!(key = %key, "dedup leader vanished, re-arbitrating");
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Removes the slot for `key` only if `token` still identifies it,
    /// returning it for a final broadcast.
    fn remove_if_owner(&self, key: &RequestKey, token: &Arc<AtomicUsize>) -> Option<Slot<T>> {
        let mut pending = self.pending.lock();
        match pending.get(key) {
            Some(slot) if Arc::ptr_eq(&slot.waiters, token) => pending.remove(key),
            _ => None,
        }
    }

    /// Drops pending slots older than `max_age`. Their waiters observe
    /// a closed channel and retry independently.
    pub fn sweep(&self) -> usize {
        let cutoff = self.config.max_age;
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, slot| slot.created.elapsed() <= cutoff);
        before - pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn stats(&self) -> DedupeStats {
        let pending = self.pending.lock();
        let mut waiters: Vec<_> = pending
            .iter()
            .map(|(k, slot)| (k.clone(), slot.waiters.load(Ordering::SeqCst)))
            .collect();
        waiters.sort();
        DedupeStats {
            pending: pending.len(),
            waiters,
        }
    }
}

impl<T: Clone + Send + 'static> Deduplicator<T> {
    /// Spawns the background sweeper; the handle aborts with the engine.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let dedup = Arc::clone(self);
        let interval = dedup.config.sweep_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = dedup.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "swept stale dedup slots");
                }
            }
        })
    }
}

impl<T: Clone> Default for Deduplicator<T> {
    fn default() -> Self {
        Self::new(DedupeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchkit_core::{FetchError, FetchRequest, RequestKey};
    use std::sync::atomic::AtomicU32;
    use url::Url;

    fn key(path: &str) -> RequestKey {
        let url = Url::parse(&format!("https://example.test{path}")).unwrap();
        RequestKey::for_request(&FetchRequest::get(url))
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let dedup: Arc<Deduplicator<u32>> = Arc::new(Deduplicator::default());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dedup = Arc::clone(&dedup);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                dedup
                    .deduplicate(key("/data"), || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            42u32
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn errors_are_shared_too() {
        let dedup: Arc<Deduplicator<Result<u32, FetchError>>> = Arc::new(Deduplicator::default());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let dedup = Arc::clone(&dedup);
            handles.push(tokio::spawn(async move {
                dedup
                    .deduplicate(key("/boom"), || async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(FetchError::Server { status: 500 })
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(
                handle.await.unwrap(),
                Err(FetchError::Server { status: 500 })
            );
        }
    }

    #[tokio::test]
    async fn different_keys_run_independently() {
        let dedup: Arc<Deduplicator<u32>> = Arc::new(Deduplicator::default());
        let calls = Arc::new(AtomicU32::new(0));

        let run = |path: &'static str| {
            let dedup = Arc::clone(&dedup);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                dedup
                    .deduplicate(key(path), || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            1u32
                        }
                    })
                    .await
            })
        };

        let a = run("/a");
        let b = run("/b");
        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_leader_promotes_a_waiter() {
        let dedup: Arc<Deduplicator<u32>> = Arc::new(Deduplicator::default());
        let calls = Arc::new(AtomicU32::new(0));

        // Leader parks forever; we cancel it shortly.
        let leader = {
            let dedup = Arc::clone(&dedup);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                dedup
                    .deduplicate(key("/slow"), || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_secs(3600)).await;
                            0u32
                        }
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let waiter = {
            let dedup = Arc::clone(&dedup);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                dedup
                    .deduplicate(key("/slow"), || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            7u32
                        }
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        leader.abort();
        let got = waiter.await.unwrap();
        assert_eq!(got, 7);
        // First executor ran (and was cancelled), waiter's ran to completion.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn sweep_unblocks_stale_waiters() {
        let dedup: Arc<Deduplicator<u32>> = Arc::new(Deduplicator::new(DedupeConfig {
            max_age: Duration::from_millis(10),
            sweep_interval: Duration::from_secs(3600),
        }));

        let leader = {
            let dedup = Arc::clone(&dedup);
            tokio::spawn(async move {
                dedup
                    .deduplicate(key("/stuck"), || async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        0u32
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(dedup.pending_count(), 1);

        assert_eq!(dedup.sweep(), 1);
        assert_eq!(dedup.pending_count(), 0);
        leader.abort();
    }

    #[tokio::test]
    async fn stats_expose_waiter_counts() {
        let dedup: Arc<Deduplicator<u32>> = Arc::new(Deduplicator::default());

        let leader = {
            let dedup = Arc::clone(&dedup);
            tokio::spawn(async move {
                dedup
                    .deduplicate(key("/watched"), || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        1u32
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let dedup = Arc::clone(&dedup);
                tokio::spawn(
                    async move { dedup.deduplicate(key("/watched"), || async { 1u32 }).await },
                )
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = dedup.stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.waiters[0].1, 3);

        leader.await.unwrap();
        for w in waiters {
            assert_eq!(w.await.unwrap(), 1);
        }
    }
}
