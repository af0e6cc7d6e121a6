//! Remote key-value backend.
//!
//! The engine does not ship a client for any particular store; callers
//! provide a [`KvStore`] (Redis, memcached, a sidecar, ...) and the
//! backend serializes entries under `<prefix><key>`. An in-memory
//! [`MemoryKv`] ships for tests and as a reference implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fetchkit_core::FetchError;
use parking_lot::Mutex;

use crate::backend::CacheBackend;
use crate::entry::CacheEntry;

/// Minimal byte-oriented KV contract the remote backend builds on.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FetchError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), FetchError>;
    async fn delete(&self, key: &str) -> Result<bool, FetchError>;
    /// Keys currently stored under `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, FetchError>;
}

/// In-memory [`KvStore`] for tests.
#[derive(Default)]
pub struct MemoryKv {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FetchError> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), FetchError> {
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, FetchError> {
        Ok(self.data.lock().remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, FetchError> {
        Ok(self
            .data
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Cache backend over any [`KvStore`].
pub struct RemoteBackend {
    kv: Arc<dyn KvStore>,
    prefix: String,
}

impl RemoteBackend {
    pub fn new(kv: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl CacheBackend for RemoteBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, FetchError> {
        let raw = match self.kv.get(&self.full_key(key)).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let mut entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key, error = %e, "dropping corrupt remote cache value");
                let _ = self.kv.delete(&self.full_key(key)).await;
                return Ok(None);
            }
        };
        if entry.is_expired() {
            let _ = self.kv.delete(&self.full_key(key)).await;
            return Ok(None);
        }
        entry.touch();
        Ok(Some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> Result<usize, FetchError> {
        let raw = serde_json::to_vec(&entry).map_err(|e| FetchError::Io {
            message: e.to_string(),
        })?;
        self.kv.set(&self.full_key(&entry.key), raw).await?;
        Ok(0)
    }

    async fn delete(&self, key: &str) -> Result<bool, FetchError> {
        self.kv.delete(&self.full_key(key)).await
    }

    async fn clear(&self) -> Result<(), FetchError> {
        for key in self.kv.keys_with_prefix(&self.prefix).await? {
            let _ = self.kv.delete(&key).await;
        }
        Ok(())
    }

    async fn len(&self) -> usize {
        self.kv
            .keys_with_prefix(&self.prefix)
            .await
            .map(|keys| keys.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry::new(
            key.to_string(),
            b"remote body".to_vec(),
            BTreeMap::new(),
            200,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn round_trips_with_prefix() {
        let kv = Arc::new(MemoryKv::new());
        let backend = RemoteBackend::new(Arc::clone(&kv) as Arc<dyn KvStore>, "fetchkit:");
        backend.put(entry("deadbeef")).await.unwrap();

        // Stored under the prefixed key.
        assert!(kv.get("fetchkit:deadbeef").await.unwrap().is_some());

        let got = backend.get("deadbeef").await.unwrap().unwrap();
        assert_eq!(got.body, b"remote body");
    }

    #[tokio::test]
    async fn clear_only_touches_the_prefix() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("other:keep", b"keep".to_vec()).await.unwrap();
        let backend = RemoteBackend::new(Arc::clone(&kv) as Arc<dyn KvStore>, "fetchkit:");
        backend.put(entry("a")).await.unwrap();
        backend.put(entry("b")).await.unwrap();
        assert_eq!(backend.len().await, 2);

        backend.clear().await.unwrap();
        assert_eq!(backend.len().await, 0);
        assert!(kv.get("other:keep").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_remote_values_are_deleted() {
        let kv = Arc::new(MemoryKv::new());
        let backend = RemoteBackend::new(Arc::clone(&kv) as Arc<dyn KvStore>, "fetchkit:");
        let mut e = entry("old");
        e.stored_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        e.ttl = Duration::from_secs(1);
        backend.put(e).await.unwrap();
        assert!(backend.get("old").await.unwrap().is_none());
        assert!(kv.get("fetchkit:old").await.unwrap().is_none());
    }
}
