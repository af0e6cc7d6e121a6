//! The serialized cache entry and its compression handling.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fetchkit_core::FetchError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

/// One cached response. Self-describing: the file and remote backends
/// persist it as JSON and can read it back without out-of-band state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    /// Body bytes, possibly gzip-compressed (see `compressed`).
    pub body: Vec<u8>,
    pub headers: BTreeMap<String, String>,
    pub status: u16,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub compressed: bool,
    /// Uncompressed body size.
    pub size: usize,
    pub hit_count: u64,
    pub last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    /// Builds an entry, lifting the conditional-request metadata out of
    /// the response headers.
    pub fn new(
        key: String,
        body: Vec<u8>,
        headers: BTreeMap<String, String>,
        status: u16,
        ttl: Duration,
    ) -> CacheEntry {
        let now = Utc::now();
        let etag = headers.get("etag").cloned();
        let last_modified = headers.get("last-modified").cloned();
        CacheEntry {
            key,
            size: body.len(),
            body,
            headers,
            status,
            stored_at: now,
            ttl,
            etag,
            last_modified,
            compressed: false,
            hit_count: 0,
            last_accessed: now,
        }
    }

    /// `true` once `now − stored_at > ttl`.
    pub fn is_expired(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.stored_at);
        age.to_std().map(|age| age > self.ttl).unwrap_or(false)
    }

    /// Registers a read.
    pub fn touch(&mut self) {
        self.hit_count += 1;
        self.last_accessed = Utc::now();
    }

    /// Compresses the body in place when it reaches `threshold` bytes.
    pub fn compress_if_large(&mut self, threshold: usize) -> Result<(), FetchError> {
        if self.compressed || self.body.len() < threshold {
            return Ok(());
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.body)?;
        let packed = encoder.finish()?;
        // Incompressible payloads stay as they are.
        if packed.len() < self.body.len() {
            self.body = packed;
            self.compressed = true;
        }
        Ok(())
    }

    /// Decompresses the body in place if needed.
    pub fn decompress(&mut self) -> Result<(), FetchError> {
        if !self.compressed {
            return Ok(());
        }
        let mut decoder = GzDecoder::new(self.body.as_slice());
        let mut out = Vec::with_capacity(self.size);
        decoder.read_to_end(&mut out)?;
        self.body = out;
        self.compressed = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(body: &[u8], ttl: Duration) -> CacheEntry {
        let mut headers = BTreeMap::new();
        headers.insert("etag".to_string(), "\"abc123\"".to_string());
        headers.insert(
            "last-modified".to_string(),
            "Wed, 01 Jan 2025 00:00:00 GMT".to_string(),
        );
        CacheEntry::new("k".to_string(), body.to_vec(), headers, 200, ttl)
    }

    #[test]
    fn conditional_metadata_is_lifted() {
        let e = entry(b"hello", Duration::from_secs(60));
        assert_eq!(e.etag.as_deref(), Some("\"abc123\""));
        assert!(e.last_modified.is_some());
        assert_eq!(e.size, 5);
        assert!(!e.is_expired());
    }

    #[test]
    fn expiry_follows_ttl() {
        let mut e = entry(b"x", Duration::from_secs(1));
        assert!(!e.is_expired());
        e.stored_at = Utc::now() - chrono::Duration::seconds(2);
        assert!(e.is_expired());
    }

    #[test]
    fn compression_round_trips() {
        let body = vec![b'a'; 10_000];
        let mut e = entry(&body, Duration::from_secs(60));
        e.compress_if_large(1024).unwrap();
        assert!(e.compressed);
        assert!(e.body.len() < body.len());
        assert_eq!(e.size, body.len());

        e.decompress().unwrap();
        assert!(!e.compressed);
        assert_eq!(e.body, body);
    }

    #[test]
    fn small_bodies_stay_uncompressed() {
        let mut e = entry(b"tiny", Duration::from_secs(60));
        e.compress_if_large(1024).unwrap();
        assert!(!e.compressed);
        assert_eq!(e.body, b"tiny");
    }

    #[test]
    fn serde_round_trip() {
        let mut e = entry(b"payload", Duration::from_secs(60));
        e.compress_if_large(0).unwrap();
        let json = serde_json::to_string(&e).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
