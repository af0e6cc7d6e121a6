//! The backend trait and the in-memory LRU backend.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use fetchkit_core::FetchError;
use parking_lot::Mutex;

use crate::entry::CacheEntry;

/// Storage backend behind [`crate::ResponseCache`]. Implementations are
/// internally synchronized; `put` returns how many entries it evicted
/// to make room.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, FetchError>;
    async fn put(&self, entry: CacheEntry) -> Result<usize, FetchError>;
    async fn delete(&self, key: &str) -> Result<bool, FetchError>;
    async fn clear(&self) -> Result<(), FetchError>;
    async fn len(&self) -> usize;
}

struct LruState {
    entries: HashMap<String, CacheEntry>,
    /// Keys in access order, oldest first. May hold stale duplicates;
    /// `entries` is authoritative.
    order: VecDeque<String>,
}

impl LruState {
    fn promote(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }
}

/// Count-bounded LRU kept entirely in memory.
pub struct MemoryBackend {
    capacity: usize,
    state: Mutex<LruState>,
}

impl MemoryBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, FetchError> {
        let mut state = self.state.lock();
        match state.entries.get_mut(key) {
            Some(entry) if entry.is_expired() => {
                state.entries.remove(key);
                Ok(None)
            }
            Some(entry) => {
                entry.touch();
                let found = entry.clone();
                state.promote(key);
                Ok(Some(found))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, entry: CacheEntry) -> Result<usize, FetchError> {
        let mut state = self.state.lock();
        let key = entry.key.clone();
        state.entries.insert(key.clone(), entry);
        state.promote(&key);

        let mut evicted = 0;
        while state.entries.len() > self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    if oldest != key && state.entries.remove(&oldest).is_some() {
                        evicted += 1;
                    }
                }
                None => break,
            }
        }
        Ok(evicted)
    }

    async fn delete(&self, key: &str) -> Result<bool, FetchError> {
        let mut state = self.state.lock();
        Ok(state.entries.remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), FetchError> {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
        Ok(())
    }

    async fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}
