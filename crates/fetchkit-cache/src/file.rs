//! File-backed cache: one JSON document per entry.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fetchkit_core::FetchError;

use crate::backend::CacheBackend;
use crate::entry::CacheEntry;

/// Persists entries as `<dir>/<key>.cache`, where the key is already a
/// hex digest. Writes are atomic: a temp file in the same directory is
/// renamed into place, so concurrent readers never observe a torn
/// entry. No OS-level locks are taken.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Creates the backend; the directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.cache"))
    }
}

#[async_trait]
impl CacheBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, FetchError> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                // A corrupt file is a miss, not a hard failure.
                tracing::warn!(path = %path.display(), error = %e, "dropping corrupt cache file");
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        };
        if entry.is_expired() {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        entry.touch();
        // Persisting the touch is best-effort; reads must not fail on a
        // write race.
        if let Ok(raw) = serde_json::to_vec(&entry) {
            let _ = write_atomic(&path, &raw).await;
        }
        Ok(Some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> Result<usize, FetchError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&entry.key);
        let raw = serde_json::to_vec(&entry).map_err(|e| FetchError::Io {
            message: e.to_string(),
        })?;
        write_atomic(&path, &raw).await?;
        Ok(0)
    }

    async fn delete(&self, key: &str) -> Result<bool, FetchError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<(), FetchError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(item) = dir.next_entry().await? {
            if item.path().extension().is_some_and(|ext| ext == "cache") {
                let _ = tokio::fs::remove_file(item.path()).await;
            }
        }
        Ok(())
    }

    async fn len(&self) -> usize {
        let mut count = 0;
        if let Ok(mut dir) = tokio::fs::read_dir(&self.dir).await {
            while let Ok(Some(item)) = dir.next_entry().await {
                if item.path().extension().is_some_and(|ext| ext == "cache") {
                    count += 1;
                }
            }
        }
        count
    }
}

async fn write_atomic(path: &Path, raw: &[u8]) -> Result<(), FetchError> {
    let tmp = path.with_extension("cache.tmp");
    tokio::fs::write(&tmp, raw).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn entry(key: &str, body: &[u8]) -> CacheEntry {
        CacheEntry::new(
            key.to_string(),
            body.to_vec(),
            BTreeMap::new(),
            200,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend.put(entry("aabbcc", b"payload")).await.unwrap();

        assert!(dir.path().join("aabbcc.cache").exists());
        let got = backend.get("aabbcc").await.unwrap().unwrap();
        assert_eq!(got.body, b"payload");
        assert_eq!(got.hit_count, 1);
    }

    #[tokio::test]
    async fn missing_and_corrupt_files_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        assert!(backend.get("nothing").await.unwrap().is_none());

        tokio::fs::create_dir_all(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("bad.cache"), b"{ not json")
            .await
            .unwrap();
        assert!(backend.get("bad").await.unwrap().is_none());
        // The corrupt file was dropped.
        assert!(!dir.path().join("bad.cache").exists());
    }

    #[tokio::test]
    async fn expired_entries_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let mut e = entry("old", b"x");
        e.stored_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        e.ttl = Duration::from_secs(1);
        backend.put(e).await.unwrap();
        assert!(backend.get("old").await.unwrap().is_none());
        assert!(!dir.path().join("old.cache").exists());
    }

    #[tokio::test]
    async fn clear_removes_only_cache_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend.put(entry("one", b"1")).await.unwrap();
        backend.put(entry("two", b"2")).await.unwrap();
        tokio::fs::write(dir.path().join("keep.txt"), b"keep")
            .await
            .unwrap();

        assert_eq!(backend.len().await, 2);
        backend.clear().await.unwrap();
        assert_eq!(backend.len().await, 0);
        assert!(dir.path().join("keep.txt").exists());
    }
}
