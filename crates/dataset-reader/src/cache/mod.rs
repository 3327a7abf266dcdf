//! Metadata cache with single-flight misses and degraded-mode fallback.
//!
//! ```text
//! get_or_compute(fp)
//!      │
//!      ├─► breaker closed? ──► backend GET ──► fresh entry ──► hit
//!      │
//!      └─► miss: SingleFlight::run(fp)
//!                 │
//!                 ├─► re-check backend (another process may have filled it)
//!                 ├─► compute (resolve + open), bounded by open_timeout
//!                 └─► backend SET EX ttl (skipped while degraded)
//! ```
//!
//! Backend failures never reach the caller. They are logged, counted and
//! fed to the circuit breaker, and the request is served by computing.
//! Failed computations are never stored.

mod breaker;
mod single_flight;

pub use breaker::{BreakerState, CircuitBreaker};
pub use single_flight::SingleFlight;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use multidim_common::MultidimResult;
use storage::CacheBackend;

use crate::config::ReaderConfig;
use crate::fingerprint::Fingerprint;
use crate::types::DatasetMetadata;

/// Envelope format written by this version.
pub const ENTRY_VERSION: u32 = 1;

/// Serialized form of one cached metadata record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheEntry {
    pub version: u32,
    pub fingerprint: String,
    pub created_at_ms: i64,
    pub ttl_ms: u64,
    pub metadata: DatasetMetadata,
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self {
            version: ENTRY_VERSION,
            fingerprint: String::new(),
            created_at_ms: 0,
            ttl_ms: 0,
            metadata: DatasetMetadata::default(),
        }
    }
}

impl CacheEntry {
    pub fn new(fingerprint: &Fingerprint, metadata: DatasetMetadata, ttl: Duration) -> Self {
        Self {
            version: ENTRY_VERSION,
            fingerprint: fingerprint.as_str().to_string(),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            ttl_ms: ttl.as_millis() as u64,
            metadata,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) >= self.ttl_ms as i64
    }
}

/// Cache behaviour knobs, usually taken from [`ReaderConfig`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
    pub key_prefix: String,
    pub open_timeout: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&ReaderConfig::default())
    }
}

impl From<&ReaderConfig> for CacheSettings {
    fn from(config: &ReaderConfig) -> Self {
        Self {
            enabled: config.cache_enabled,
            ttl: config.cache_ttl(),
            key_prefix: config.cache_key_prefix.clone(),
            open_timeout: config.open_timeout(),
            breaker_failure_threshold: config.breaker_failure_threshold,
            breaker_cooldown: config.breaker_cooldown(),
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Computations actually run.
    pub computes: u64,
    /// Callers that waited on another caller's computation.
    pub joined: u64,
    pub backend_errors: u64,
    /// Lookups and writes skipped because caching is off or degraded.
    pub bypassed: u64,
    pub in_flight: usize,
    pub backend: Option<String>,
    pub degraded: bool,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computes: AtomicU64,
    backend_errors: AtomicU64,
    bypassed: AtomicU64,
}

struct Inner {
    backend: Option<Arc<dyn CacheBackend>>,
    settings: CacheSettings,
    breaker: CircuitBreaker,
    flights: SingleFlight<Arc<DatasetMetadata>>,
    counters: Counters,
}

/// Fingerprint-keyed metadata cache. Cloning shares the same state.
#[derive(Clone)]
pub struct MetadataCache {
    inner: Arc<Inner>,
}

impl MetadataCache {
    /// Create a cache over `backend`. `None` disables storage entirely.
    pub fn new(backend: Option<Arc<dyn CacheBackend>>, settings: CacheSettings) -> Self {
        let backend = if settings.enabled { backend } else { None };

        Self {
            inner: Arc::new(Inner {
                breaker: CircuitBreaker::new(
                    settings.breaker_failure_threshold,
                    settings.breaker_cooldown,
                ),
                flights: SingleFlight::with_timeout(settings.open_timeout),
                backend,
                settings,
                counters: Counters::default(),
            }),
        }
    }

    /// Return the metadata for `fingerprint`, running `compute` only on a
    /// genuine miss and at most once at a time per fingerprint.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        compute: F,
    ) -> MultidimResult<Arc<DatasetMetadata>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = MultidimResult<DatasetMetadata>> + Send + 'static,
    {
        if let Some(hit) = self.inner.lookup(fingerprint).await {
            return Ok(hit);
        }

        let inner = Arc::clone(&self.inner);
        let fp = fingerprint.clone();

        self.inner
            .flights
            .run(fingerprint.as_str(), move || async move {
                // Another process (or a flight that just finished) may have
                // filled the entry since our lookup.
                if let Some(hit) = inner.peek(&fp).await {
                    return Ok(hit);
                }

                inner.counters.computes.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fp, "Computing dataset metadata");
                let metadata = compute().await?;

                inner.store(&fp, &metadata).await;
                Ok(Arc::new(metadata))
            })
            .await
    }

    /// Remove the entry for `fingerprint`. Best effort.
    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        let Some(backend) = self.inner.backend.as_ref() else {
            return;
        };
        if !self.inner.breaker.allow() {
            self.inner.counters.bypassed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let key = fingerprint.cache_key(&self.inner.settings.key_prefix);
        match backend.delete(&key).await {
            Ok(()) => {
                self.inner.breaker.record_success();
                debug!(fingerprint = %fingerprint, "Invalidated metadata entry");
            }
            Err(e) => self.inner.backend_failed("delete", &e),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            computes: c.computes.load(Ordering::Relaxed),
            joined: self.inner.flights.joined(),
            backend_errors: c.backend_errors.load(Ordering::Relaxed),
            bypassed: c.bypassed.load(Ordering::Relaxed),
            in_flight: self.inner.flights.in_flight(),
            backend: self.inner.backend.as_ref().map(|b| b.name().to_string()),
            degraded: self.inner.breaker.is_degraded(),
        }
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.inner.breaker.state()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.backend.is_some()
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }
}

impl Inner {
    /// Counted lookup: records a hit or a miss.
    async fn lookup(&self, fp: &Fingerprint) -> Option<Arc<DatasetMetadata>> {
        let found = self.peek(fp).await;
        if found.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fp, "Metadata cache hit");
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fp, "Metadata cache miss");
        }
        found
    }

    async fn peek(&self, fp: &Fingerprint) -> Option<Arc<DatasetMetadata>> {
        let backend = self.backend.as_ref()?;
        if !self.breaker.allow() {
            self.counters.bypassed.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let key = fp.cache_key(&self.settings.key_prefix);
        let bytes = match backend.get(&key).await {
            Ok(bytes) => {
                self.breaker.record_success();
                bytes?
            }
            Err(e) => {
                self.backend_failed("get", &e);
                return None;
            }
        };

        self.decode(fp, &bytes).map(Arc::new)
    }

    fn decode(&self, fp: &Fingerprint, bytes: &[u8]) -> Option<DatasetMetadata> {
        let entry: CacheEntry = match serde_json::from_slice(bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Discarding unreadable cache entry");
                return None;
            }
        };

        if entry.version != ENTRY_VERSION {
            debug!(fingerprint = %fp, version = entry.version, "Ignoring cache entry from another format version");
            return None;
        }
        if entry.fingerprint != fp.as_str() {
            warn!(fingerprint = %fp, stored = %entry.fingerprint, "Cache entry belongs to another fingerprint");
            return None;
        }
        if entry.is_expired(chrono::Utc::now().timestamp_millis()) {
            debug!(fingerprint = %fp, "Cache entry expired");
            return None;
        }

        Some(entry.metadata)
    }

    async fn store(&self, fp: &Fingerprint, metadata: &DatasetMetadata) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };

        let entry = CacheEntry::new(fp, metadata.clone(), self.settings.ttl);
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Failed to serialize metadata entry");
                return;
            }
        };

        if !self.breaker.allow() {
            self.counters.bypassed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let key = fp.cache_key(&self.settings.key_prefix);
        match backend.set(&key, bytes, self.settings.ttl).await {
            Ok(()) => self.breaker.record_success(),
            Err(e) => self.backend_failed("set", &e),
        }
    }

    fn backend_failed(&self, op: &str, error: &multidim_common::MultidimError) {
        self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
        self.breaker.record_failure();
        warn!(op, error = %error, "Cache backend error, serving without cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use multidim_common::MultidimError;
    use std::sync::atomic::AtomicUsize;
    use storage::MemoryCache;
    use tokio::sync::Notify;

    fn fp(name: &str) -> Fingerprint {
        Fingerprint::from(format!("{:0>64}", name))
    }

    fn sample(name: &str) -> DatasetMetadata {
        DatasetMetadata {
            uri: format!("memory://bucket/{}.zarr", name),
            variables: vec!["CDD0".to_string(), "DISPH".to_string()],
            ..Default::default()
        }
    }

    fn settings(ttl: Duration) -> CacheSettings {
        CacheSettings {
            ttl,
            breaker_cooldown: Duration::from_secs(60),
            ..CacheSettings::default()
        }
    }

    /// Backend that fails every call and counts them.
    #[derive(Default)]
    struct DownBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CacheBackend for DownBackend {
        fn name(&self) -> &'static str {
            "down"
        }
        async fn get(&self, _key: &str) -> MultidimResult<Option<Bytes>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MultidimError::CacheUnavailable("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> MultidimResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MultidimError::CacheUnavailable("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> MultidimResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MultidimError::CacheUnavailable("connection refused".into()))
        }
    }

    /// Backend over a `MemoryCache` that can be switched to failing or hanging.
    struct FlakyBackend {
        inner: MemoryCache,
        down: std::sync::atomic::AtomicBool,
        hang: std::sync::atomic::AtomicBool,
        gets: AtomicUsize,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                inner: MemoryCache::new(16),
                down: Default::default(),
                hang: Default::default(),
                gets: AtomicUsize::new(0),
            }
        }

        async fn gate(&self) -> MultidimResult<()> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(MultidimError::CacheUnavailable("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CacheBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }
        async fn get(&self, key: &str) -> MultidimResult<Option<Bytes>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.gate().await?;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> MultidimResult<()> {
            self.gate().await?;
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> MultidimResult<()> {
            self.gate().await?;
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_hit_before_ttl_skips_compute() {
        let cache = MetadataCache::new(Some(Arc::new(MemoryCache::new(16))), settings(Duration::from_secs(60)));
        let computes = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let computes = Arc::clone(&computes);
            let meta = cache
                .get_or_compute(&fp("a"), move || async move {
                    computes.fetch_add(1, Ordering::SeqCst);
                    Ok(sample("a"))
                })
                .await
                .unwrap();
            assert_eq!(meta.variables, vec!["CDD0", "DISPH"]);
        }

        assert_eq!(computes.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.computes, 1);
        assert_eq!(stats.backend.as_deref(), Some("memory"));
    }

    #[tokio::test]
    async fn test_concurrent_misses_compute_once() {
        let cache = MetadataCache::new(Some(Arc::new(MemoryCache::new(16))), settings(Duration::from_secs(60)));
        let computes = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let computes = Arc::clone(&computes);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&fp("b"), move || async move {
                        computes.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok(sample("b"))
                    })
                    .await
            }));
        }

        while cache.stats().misses < 16 {
            tokio::task::yield_now().await;
        }
        // Every caller missed; wait until all of them are parked on the flight
        while cache.stats().joined < 15 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().uri, "memory://bucket/b.zarr");
        }
        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recompute_once_after_ttl() {
        let cache = MetadataCache::new(Some(Arc::new(MemoryCache::new(16))), settings(Duration::from_millis(50)));
        let computes = Arc::new(AtomicUsize::new(0));

        let run = |cache: MetadataCache, computes: Arc<AtomicUsize>| async move {
            cache
                .get_or_compute(&fp("c"), move || async move {
                    computes.fetch_add(1, Ordering::SeqCst);
                    Ok(sample("c"))
                })
                .await
        };

        run(cache.clone(), Arc::clone(&computes)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let results = futures::future::join_all(
            (0..8).map(|_| run(cache.clone(), Arc::clone(&computes))),
        )
        .await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(computes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_degraded_backend_serves_correct_results() {
        let backend = Arc::new(DownBackend::default());
        let cache = MetadataCache::new(Some(backend.clone()), settings(Duration::from_secs(60)));

        for i in 0..6 {
            let meta = cache
                .get_or_compute(&fp("d"), || async { Ok(sample("d")) })
                .await
                .unwrap_or_else(|e| panic!("request {} failed: {}", i, e));
            assert_eq!(meta.uri, "memory://bucket/d.zarr");
        }

        // get + re-check on request 1, then the breaker opens after 3 failures
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        let stats = cache.stats();
        assert!(stats.degraded);
        assert_eq!(stats.computes, 6);
        assert_eq!(stats.backend_errors, 3);
        assert!(stats.bypassed > 0);
        assert_eq!(cache.breaker_state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_failed_compute_is_not_cached() {
        let backend = Arc::new(MemoryCache::new(16));
        let cache = MetadataCache::new(Some(backend.clone()), settings(Duration::from_secs(60)));

        let err = cache
            .get_or_compute(&fp("e"), || async {
                Err(MultidimError::group_not_found("memory://bucket/e.zarr", "3"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MultidimError::GroupNotFound { .. }));
        assert!(backend.is_empty().await);

        // Next caller retries
        let meta = cache
            .get_or_compute(&fp("e"), || async { Ok(sample("e")) })
            .await
            .unwrap();
        assert_eq!(meta.uri, "memory://bucket/e.zarr");
    }

    #[tokio::test]
    async fn test_corrupt_and_foreign_entries_are_misses() {
        let backend = Arc::new(MemoryCache::new(16));
        let cache = MetadataCache::new(Some(backend.clone()), settings(Duration::from_secs(60)));
        let key = fp("f").cache_key("multidim:meta");

        backend
            .set(&key, Bytes::from_static(b"\x00not json"), Duration::from_secs(60))
            .await
            .unwrap();
        let meta = cache
            .get_or_compute(&fp("f"), || async { Ok(sample("f")) })
            .await
            .unwrap();
        assert_eq!(meta.uri, "memory://bucket/f.zarr");

        // An entry written under this key for another fingerprint
        let foreign = CacheEntry::new(&fp("other"), sample("other"), Duration::from_secs(60));
        backend
            .set(&key, Bytes::from(serde_json::to_vec(&foreign).unwrap()), Duration::from_secs(60))
            .await
            .unwrap();
        let meta = cache
            .get_or_compute(&fp("f"), || async { Ok(sample("f")) })
            .await
            .unwrap();
        assert_eq!(meta.uri, "memory://bucket/f.zarr");
        assert_eq!(cache.stats().computes, 2);
    }

    #[tokio::test]
    async fn test_unknown_fields_are_tolerated() {
        let backend = Arc::new(MemoryCache::new(16));
        let cache = MetadataCache::new(Some(backend.clone()), settings(Duration::from_secs(60)));
        let fingerprint = fp("g");

        let entry = serde_json::json!({
            "version": ENTRY_VERSION,
            "fingerprint": fingerprint.as_str(),
            "created_at_ms": chrono::Utc::now().timestamp_millis(),
            "ttl_ms": 60_000,
            "written_by": "a newer release",
            "metadata": {"uri": "memory://bucket/g.zarr", "variables": ["v"], "extra": true}
        });
        backend
            .set(
                &fingerprint.cache_key("multidim:meta"),
                Bytes::from(entry.to_string()),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let meta = cache
            .get_or_compute(&fingerprint, || async {
                Err(MultidimError::Internal("should not compute".into()))
            })
            .await
            .unwrap();
        assert_eq!(meta.variables, vec!["v"]);
    }

    #[tokio::test]
    async fn test_disabled_cache_computes_every_time() {
        let backend = Arc::new(MemoryCache::new(16));
        let cache = MetadataCache::new(
            Some(backend.clone()),
            CacheSettings {
                enabled: false,
                ..CacheSettings::default()
            },
        );

        for _ in 0..3 {
            cache
                .get_or_compute(&fp("h"), || async { Ok(sample("h")) })
                .await
                .unwrap();
        }
        assert_eq!(cache.stats().computes, 3);
        assert!(!cache.is_enabled());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_cancel_shared_compute() {
        let cache = MetadataCache::new(Some(Arc::new(MemoryCache::new(16))), settings(Duration::from_secs(60)));
        let gate = Arc::new(Notify::new());

        let spawn_caller = |cache: MetadataCache, gate: Arc<Notify>| {
            tokio::spawn(async move {
                cache
                    .get_or_compute(&fp("j"), move || async move {
                        gate.notified().await;
                        Ok(sample("j"))
                    })
                    .await
            })
        };

        let first = spawn_caller(cache.clone(), Arc::clone(&gate));
        while cache.stats().computes < 1 {
            tokio::task::yield_now().await;
        }
        let second = spawn_caller(cache.clone(), Arc::clone(&gate));
        while cache.stats().joined < 1 {
            tokio::task::yield_now().await;
        }

        // The caller that started the compute goes away
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        gate.notify_one();

        let meta = second.await.unwrap().unwrap();
        assert_eq!(meta.uri, "memory://bucket/j.zarr");

        // The finished compute was stored for later callers
        cache
            .get_or_compute(&fp("j"), || async { Err(MultidimError::Internal("should hit".into())) })
            .await
            .unwrap();
        let stats = cache.stats();
        assert_eq!(stats.computes, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_breaker_recovers_after_abandoned_trial() {
        let backend = Arc::new(FlakyBackend::new());
        let cache = MetadataCache::new(
            Some(backend.clone()),
            CacheSettings {
                breaker_failure_threshold: 1,
                breaker_cooldown: Duration::from_millis(20),
                ..CacheSettings::default()
            },
        );

        backend.down.store(true, Ordering::SeqCst);
        cache
            .get_or_compute(&fp("k"), || async { Ok(sample("k")) })
            .await
            .unwrap();
        assert_eq!(cache.breaker_state(), BreakerState::Open);

        // After the cooldown one trial request hangs on the backend and is dropped
        tokio::time::sleep(Duration::from_millis(30)).await;
        backend.down.store(false, Ordering::SeqCst);
        backend.hang.store(true, Ordering::SeqCst);
        let gets_before = backend.gets.load(Ordering::SeqCst);
        let abandoned = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&fp("k"), || async { Ok(sample("k")) })
                    .await
            })
        };
        while backend.gets.load(Ordering::SeqCst) == gets_before {
            tokio::task::yield_now().await;
        }
        abandoned.abort();
        let _ = abandoned.await;
        backend.hang.store(false, Ordering::SeqCst);

        // Once the unanswered trial expires the backend is tried again
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache
            .get_or_compute(&fp("k"), || async { Ok(sample("k")) })
            .await
            .unwrap();
        assert_eq!(cache.breaker_state(), BreakerState::Closed);
        assert!(!cache.stats().degraded);

        cache
            .get_or_compute(&fp("k"), || async { Err(MultidimError::Internal("should hit".into())) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache = MetadataCache::new(Some(Arc::new(MemoryCache::new(16))), settings(Duration::from_secs(60)));

        cache
            .get_or_compute(&fp("i"), || async { Ok(sample("i")) })
            .await
            .unwrap();
        cache.invalidate(&fp("i")).await;
        cache
            .get_or_compute(&fp("i"), || async { Ok(sample("i")) })
            .await
            .unwrap();

        assert_eq!(cache.stats().computes, 2);
    }
}
