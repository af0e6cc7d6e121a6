//! Response caching.
//!
//! [`ResponseCache`] fronts one of three backends — in-memory LRU,
//! file-per-entry, or a remote KV store — with a shared key scheme
//! (SHA-256 over the URL plus the content-affecting request headers),
//! optional gzip compression for large payloads, TTL expiry, and
//! hit/miss/set/delete/eviction counters.

mod backend;
mod entry;
mod file;
mod remote;

pub use backend::{CacheBackend, MemoryBackend};
pub use entry::CacheEntry;
pub use file::FileBackend;
pub use remote::{KvStore, MemoryKv, RemoteBackend};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fetchkit_core::{FetchError, RequestKey};

#[cfg(feature = "metrics")]
use metrics::counter;

/// Which backend a cache is built over.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheBackendKind {
    #[default]
    Memory,
    File {
        dir: PathBuf,
    },
    /// Remote KV; the store itself is passed to [`ResponseCache::with_backend`].
    Remote {
        prefix: String,
    },
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// TTL applied when `put` is not given one.
    pub default_ttl: Duration,
    /// Bodies at or above this size are gzip-compressed on store.
    pub compression_threshold: usize,
    /// Entry cap for the memory backend.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            default_ttl: Duration::from_secs(300),
            compression_threshold: 4096,
            max_entries: 1000,
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
}

/// The response cache the engine consults before touching the network.
pub struct ResponseCache {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    counters: Counters,
}

impl ResponseCache {
    /// Builds the cache from config. `Remote` needs
    /// [`ResponseCache::with_backend`] since the store is external.
    pub fn new(config: CacheConfig) -> ResponseCache {
        let backend: Arc<dyn CacheBackend> = match &config.backend {
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new(config.max_entries)),
            CacheBackendKind::File { dir } => Arc::new(FileBackend::new(dir.clone())),
            CacheBackendKind::Remote { .. } => Arc::new(MemoryBackend::new(config.max_entries)),
        };
        ResponseCache {
            backend,
            config,
            counters: Counters::default(),
        }
    }

    /// Builds the cache over an explicit backend (remote KV, custom).
    pub fn with_backend(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> ResponseCache {
        ResponseCache {
            backend,
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Derives the cache key for a URL and its request headers.
    pub fn key_for(url: &str, headers: &BTreeMap<String, String>) -> RequestKey {
        let pairs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        RequestKey::for_url(url, &pairs)
    }

    /// Looks up a fresh entry. Bodies come back decompressed.
    pub async fn get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<Option<CacheEntry>, FetchError> {
        let key = Self::key_for(url, headers);
        match self.backend.get(key.as_str()).await? {
            Some(mut entry) => {
                entry.decompress()?;
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!("fetchkit_cache_lookups_total", "outcome" => "hit").increment(1);
                Ok(Some(entry))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!("fetchkit_cache_lookups_total", "outcome" => "miss").increment(1);
                Ok(None)
            }
        }
    }

    /// Stores a response body under the derived key.
    pub async fn put(
        &self,
        url: &str,
        request_headers: &BTreeMap<String, String>,
        status: u16,
        response_headers: BTreeMap<String, String>,
        body: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), FetchError> {
        let key = Self::key_for(url, request_headers);
        let mut entry = CacheEntry::new(
            key.to_string(),
            body.to_vec(),
            response_headers,
            status,
            ttl.unwrap_or(self.config.default_ttl),
        );
        entry.compress_if_large(self.config.compression_threshold)?;
        let evicted = self.backend.put(entry).await?;
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        self.counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        Ok(())
    }

    pub async fn delete(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<bool, FetchError> {
        let key = Self::key_for(url, headers);
        let removed = self.backend.delete(key.as_str()).await?;
        if removed {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<(), FetchError> {
        self.backend.clear().await
    }

    pub async fn len(&self) -> usize {
        self.backend.len().await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}
