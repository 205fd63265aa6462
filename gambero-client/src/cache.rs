//! Station cache: versioned last-known state with TTL eviction
//!
//! Serves stale-but-instant state on reconnect while a fresh fetch is in
//! flight. Writes go through `update_if_newer`: an out-of-order or replayed
//! event can never downgrade an entry, so the stored version is monotone
//! per key. A periodic sweep evicts expired entries; `destroy()` stops the
//! sweep so no timer outlives the cache.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// One cached value
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub version: u64,
    expires_at: Instant,
}

struct CacheInner<T> {
    entries: DashMap<String, CacheEntry<T>>,
    ttl: Duration,
    sweep_cancel: CancellationToken,
}

pub struct StationCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for StationCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> StationCache<T> {
    /// Create a cache and start its eviction sweep
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        let inner = Arc::new(CacheInner {
            entries: DashMap::new(),
            ttl,
            sweep_cancel: CancellationToken::new(),
        });

        let sweep_inner = inner.clone();
        let cancel = inner.sweep_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        sweep_inner.entries.retain(|_, entry| entry.expires_at > now);
                    }
                }
            }
        });

        Self { inner }
    }

    /// Current value, if present and not expired
    pub fn get(&self, key: &str) -> Option<T> {
        self.get_entry(key).map(|e| e.value)
    }

    /// Current value with its version
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<T>> {
        let entry = self.inner.entries.get(key)?;
        // Lazy expiry: the sweep may not have run yet
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.inner.entries.remove(key);
            return None;
        }
        Some(entry.clone())
    }

    /// Stored version for a key
    pub fn version(&self, key: &str) -> Option<u64> {
        self.get_entry(key).map(|e| e.version)
    }

    /// Merge a value iff its version is strictly newer
    ///
    /// Returns true when the write happened. Equal or older versions are
    /// ignored: stale events never downgrade the cache.
    pub fn update_if_newer(&self, key: impl Into<String>, value: T, version: u64) -> bool {
        use dashmap::mapref::entry::Entry;

        let expires_at = Instant::now() + self.inner.ttl;
        match self.inner.entries.entry(key.into()) {
            Entry::Occupied(mut occupied) => {
                if version > occupied.get().version {
                    occupied.insert(CacheEntry {
                        value,
                        version,
                        expires_at,
                    });
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    value,
                    version,
                    expires_at,
                });
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Stop the sweep and drop every entry; idempotent
    pub fn destroy(&self) {
        self.inner.sweep_cancel.cancel();
        self.inner.entries.clear();
    }
}

impl<T> Drop for CacheInner<T> {
    fn drop(&mut self) {
        // Last handle gone: make sure the sweep task exits too
        self.sweep_cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_if_newer_semantics() {
        let cache: StationCache<String> =
            StationCache::new(Duration::from_secs(60), Duration::from_secs(10));

        assert!(cache.update_if_newer("table:7", "occupied".into(), 1));
        assert!(cache.update_if_newer("table:7", "cleaning".into(), 3));
        // Stale and equal versions are ignored
        assert!(!cache.update_if_newer("table:7", "occupied".into(), 2));
        assert!(!cache.update_if_newer("table:7", "occupied".into(), 3));

        assert_eq!(cache.get("table:7").as_deref(), Some("cleaning"));
        assert_eq!(cache.version("table:7"), Some(3));
        cache.destroy();
    }

    #[tokio::test]
    async fn test_version_monotone_under_any_sequence() {
        let cache: StationCache<u64> =
            StationCache::new(Duration::from_secs(60), Duration::from_secs(10));

        // Adversarial version sequence; stored version must never decrease
        let versions = [5u64, 3, 8, 8, 1, 12, 7, 12, 15];
        let mut last = 0u64;
        for v in versions {
            cache.update_if_newer("k", v, v);
            let stored = cache.version("k").unwrap();
            assert!(stored >= last, "version went backwards: {} -> {}", last, stored);
            last = stored;
        }
        assert_eq!(cache.version("k"), Some(15));
        cache.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_eviction() {
        let cache: StationCache<String> =
            StationCache::new(Duration::from_secs(30), Duration::from_secs(5));

        cache.update_if_newer("k", "v".into(), 1);
        assert!(cache.get("k").is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
        cache.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_refreshes_ttl() {
        let cache: StationCache<String> =
            StationCache::new(Duration::from_secs(30), Duration::from_secs(500));

        cache.update_if_newer("k", "v1".into(), 1);
        tokio::time::sleep(Duration::from_secs(20)).await;
        cache.update_if_newer("k", "v2".into(), 2);
        tokio::time::sleep(Duration::from_secs(20)).await;
        // 40s after insert but only 20s after the refresh
        assert_eq!(cache.get("k").as_deref(), Some("v2"));
        cache.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_stops_sweep() {
        let cache: StationCache<String> =
            StationCache::new(Duration::from_secs(60), Duration::from_secs(1));
        cache.update_if_newer("k", "v".into(), 1);
        cache.destroy();
        cache.destroy(); // idempotent

        // Sweep is gone; advancing time panics nothing and entries stay cleared
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(cache.is_empty());
    }
}
