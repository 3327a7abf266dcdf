//! In-process LRU backend with per-entry expiry.
//!
//! Used when no Redis URL is configured, and by tests. Entries past their
//! deadline are dropped on read.

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use multidim_common::MultidimResult;

use crate::backend::CacheBackend;

struct Slot {
    value: Bytes,
    expires_at: Instant,
}

/// Statistics for the memory backend
#[derive(Debug, Default, Clone)]
pub struct MemoryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub entries: usize,
}

impl MemoryCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

struct Inner {
    entries: LruCache<String, Slot>,
    stats: MemoryCacheStats,
}

/// LRU cache bounded by entry count.
pub struct MemoryCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl MemoryCache {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: MemoryCacheStats::default(),
            }),
            capacity: capacity.get(),
        }
    }

    /// Get current cache statistics.
    pub async fn stats(&self) -> MemoryCacheStats {
        let inner = self.inner.lock().await;
        let mut stats = inner.stats.clone();
        stats.entries = inner.entries.len();
        stats
    }

    /// Get cache capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get current number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Check if cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Clear the cache.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.stats = MemoryCacheStats::default();
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> MultidimResult<Option<Bytes>> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = Instant::now();

        let found = match inner.entries.get(key) {
            Some(slot) if slot.expires_at > now => Some(slot.value.clone()),
            Some(_) => {
                inner.entries.pop(key);
                inner.stats.expired += 1;
                None
            }
            None => None,
        };

        if found.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> MultidimResult<()> {
        let mut inner = self.inner.lock().await;
        inner.entries.put(
            key.to_string(),
            Slot {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> MultidimResult<()> {
        self.inner.lock().await.entries.pop(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_hit_miss() {
        let cache = MemoryCache::new(10);

        assert!(cache.get("k").await.unwrap().is_none());

        cache
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().unwrap(), Bytes::from_static(b"v"));

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped() {
        let cache = MemoryCache::new(10);
        cache
            .set("k", Bytes::from_static(b"v"), Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty().await);
        assert_eq!(cache.stats().await.expired, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = MemoryCache::new(2);
        let ttl = Duration::from_secs(60);

        cache.set("a", Bytes::from_static(b"1"), ttl).await.unwrap();
        cache.set("b", Bytes::from_static(b"2"), ttl).await.unwrap();
        // Touch "a" so "b" becomes least recently used
        cache.get("a").await.unwrap();
        cache.set("c", Bytes::from_static(b"3"), ttl).await.unwrap();

        assert!(cache.get("a").await.unwrap().is_some());
        assert!(cache.get("b").await.unwrap().is_none());
        assert!(cache.get("c").await.unwrap().is_some());
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_ok() {
        let cache = MemoryCache::new(1);
        cache.delete("nothing").await.unwrap();
        cache.set("x", Bytes::from_static(b"1"), Duration::from_secs(1)).await.unwrap();
        cache.delete("x").await.unwrap();
        assert!(cache.get("x").await.unwrap().is_none());
    }
}
