//! TTL-bounded DNS cache with SSRF re-screening.
//!
//! Hostnames pass the validator before any fetch, but a hostile zone
//! can still rebind between validation and connect. Resolving here and
//! screening every address closes most of that window and saves
//! repeated lookups for hot hosts.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use fetchkit_core::FetchError;
use fetchkit_url::is_blocked_ip;
use parking_lot::Mutex;

struct DnsEntry {
    addrs: Vec<SocketAddr>,
    resolved_at: Instant,
}

/// Cache of screened DNS results.
pub struct DnsCache {
    ttl: Duration,
    screen: bool,
    entries: Mutex<HashMap<String, DnsEntry>>,
}

impl DnsCache {
    pub fn new(ttl: Duration, screen: bool) -> Self {
        Self {
            ttl,
            screen,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `host:port`, screening every returned address against
    /// the blocked ranges when screening is enabled. Cached results are
    /// reused within the TTL.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, FetchError> {
        let cache_key = format!("{host}:{port}");
        {
            let entries = self.entries.lock();
            if let Some(entry) = entries.get(&cache_key) {
                if entry.resolved_at.elapsed() < self.ttl {
                    return Ok(entry.addrs.clone());
                }
            }
        }

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| FetchError::Dns {
                host: host.to_string(),
            })?
            .collect();

        if addrs.is_empty() {
            return Err(FetchError::Dns {
                host: host.to_string(),
            });
        }

        if self.screen {
            if let Some(blocked) = addrs.iter().find(|a| is_blocked_ip(a.ip())) {
                tracing::warn!(host, addr = %blocked, "hostname resolved into a blocked range");
                return Err(FetchError::InvalidUrl {
                    reason: format!("host '{host}' resolves to blocked address {}", blocked.ip()),
                });
            }
        }

        self.entries.lock().insert(
            cache_key,
            DnsEntry {
                addrs: addrs.clone(),
                resolved_at: Instant::now(),
            },
        );
        Ok(addrs)
    }

    pub fn cached_hosts(&self) -> usize {
        self.entries.lock().len()
    }

    /// Drops entries older than the TTL.
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        self.entries
            .lock()
            .retain(|_, entry| entry.resolved_at.elapsed() < ttl);
    }
}
