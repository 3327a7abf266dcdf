//! High-level dataset service.
//!
//! `DatasetService` is the entry point for request handlers. It ties the
//! resolver, the engine registry and the metadata cache together:
//!
//! ```text
//! metadata(id)
//!      │
//!      ├─► Fingerprint::of(id)            (no I/O)
//!      │
//!      └─► MetadataCache::get_or_compute
//!                │
//!                └─► miss: Resolver::resolve ──► DatasetOpener::open
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use dataset_reader::{DatasetIdentifier, DatasetService, ReaderConfig};
//!
//! let service = DatasetService::new(ReaderConfig::from_env())?;
//! let id = DatasetIdentifier::new("s3://bucket/era5.zarr").with_group("surface");
//! let variables = service.list_variables(&id).await?;
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, instrument};

use multidim_common::{MultidimError, MultidimResult};
use storage::{CacheBackend, MemoryCache, RedisCache};

use crate::cache::{CacheSettings, CacheStats, MetadataCache};
use crate::config::ReaderConfig;
use crate::fingerprint::Fingerprint;
use crate::histogram::histogram;
use crate::opener::{DatasetHandle, DatasetOpener};
use crate::resolver::{FilesystemTable, Resolver};
use crate::types::{DatasetIdentifier, DatasetMetadata, HistogramOptions, HistogramResult};

type HandleSlot = Arc<Mutex<Option<Arc<dyn DatasetHandle>>>>;

/// Dataset access with cached metadata.
///
/// Cloning is cheap; clones share the filesystem table and the cache.
#[derive(Clone)]
pub struct DatasetService {
    resolver: Resolver,
    opener: Arc<DatasetOpener>,
    cache: MetadataCache,
    config: ReaderConfig,
}

impl DatasetService {
    /// Build a service from configuration.
    ///
    /// The cache backend is Redis when `cache_url` is set and an in-process
    /// LRU otherwise. Redis is connected lazily, so an unreachable server
    /// does not fail construction; the cache runs degraded instead.
    pub fn new(config: ReaderConfig) -> MultidimResult<Self> {
        config
            .validate()
            .map_err(|e| MultidimError::invalid_parameter("config", e))?;

        let backend: Option<Arc<dyn CacheBackend>> = if !config.cache_enabled {
            None
        } else if let Some(url) = config.cache_url.as_deref() {
            Some(Arc::new(RedisCache::new(url, config.cache_op_timeout())?))
        } else {
            Some(Arc::new(MemoryCache::new(config.memory_cache_capacity)))
        };

        info!(
            backend = backend.as_ref().map(|b| b.name()).unwrap_or("disabled"),
            ttl_secs = config.cache_ttl_secs,
            consolidated = config.consolidated.as_str(),
            "Dataset service configured"
        );

        let resolver = Resolver::new(Arc::new(FilesystemTable::new()));
        let opener = Arc::new(DatasetOpener::from_config(&config));
        let cache = MetadataCache::new(backend, CacheSettings::from(&config));
        Ok(Self::with_parts(resolver, opener, cache, config))
    }

    /// Assemble a service from prebuilt parts (tests, embedding).
    pub fn with_parts(
        resolver: Resolver,
        opener: Arc<DatasetOpener>,
        cache: MetadataCache,
        config: ReaderConfig,
    ) -> Self {
        Self {
            resolver,
            opener,
            cache,
            config,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Histogram options carrying the configured defaults.
    pub fn histogram_options(&self) -> HistogramOptions {
        HistogramOptions {
            bins: self.config.histogram_bins,
            max_samples: self.config.histogram_max_samples,
            ..Default::default()
        }
    }

    /// Resolve and open `id` without consulting the cache.
    #[instrument(skip(self, id), fields(uri = %id.uri()))]
    pub async fn resolve_and_open(
        &self,
        id: &DatasetIdentifier,
    ) -> MultidimResult<(Arc<dyn DatasetHandle>, DatasetMetadata)> {
        open_bounded(&self.resolver, &self.opener, id, self.config.open_timeout()).await
    }

    /// Metadata for `id`, served from the cache when possible.
    #[instrument(skip(self, id), fields(uri = %id.uri()))]
    pub async fn metadata(&self, id: &DatasetIdentifier) -> MultidimResult<Arc<DatasetMetadata>> {
        self.cached_metadata(id, None).await
    }

    /// Like [`metadata`](Self::metadata), but a handle opened by this call's
    /// compute is left in `opened`.
    async fn cached_metadata(
        &self,
        id: &DatasetIdentifier,
        opened: Option<HandleSlot>,
    ) -> MultidimResult<Arc<DatasetMetadata>> {
        id.validate()?;
        let fingerprint = Fingerprint::of(id)?;

        let resolver = self.resolver.clone();
        let opener = Arc::clone(&self.opener);
        let id = id.clone();
        let timeout = self.config.open_timeout();

        self.cache
            .get_or_compute(&fingerprint, move || async move {
                let (handle, metadata) = open_bounded(&resolver, &opener, &id, timeout).await?;
                if let Some(slot) = opened {
                    if let Ok(mut slot) = slot.lock() {
                        *slot = Some(handle);
                    }
                }
                Ok(metadata)
            })
            .await
    }

    /// Data variable names of `id`, sorted.
    pub async fn list_variables(&self, id: &DatasetIdentifier) -> MultidimResult<Vec<String>> {
        Ok(self.metadata(id).await?.variables.clone())
    }

    /// Histogram of one variable.
    ///
    /// The variable is checked against cached metadata first, so an unknown
    /// name fails without opening the dataset. On a cold cache the handle
    /// opened for the metadata is reused for the read.
    #[instrument(skip(self, id, options), fields(uri = %id.uri()))]
    pub async fn histogram(
        &self,
        id: &DatasetIdentifier,
        variable: &str,
        options: &HistogramOptions,
    ) -> MultidimResult<HistogramResult> {
        let opened = HandleSlot::default();
        self.cached_metadata(id, Some(Arc::clone(&opened)))
            .await?
            .variable(variable)?;

        let reused = opened.lock().ok().and_then(|mut slot| slot.take());
        let handle = match reused {
            Some(handle) => handle,
            None => self.resolve_and_open(id).await?.0,
        };
        histogram(handle.as_ref(), variable, options).await
    }

    /// Drop the cached metadata for `id`.
    pub async fn invalidate(&self, id: &DatasetIdentifier) -> MultidimResult<()> {
        let fingerprint = Fingerprint::of(id)?;
        self.cache.invalidate(&fingerprint).await;
        Ok(())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

async fn open_bounded(
    resolver: &Resolver,
    opener: &DatasetOpener,
    id: &DatasetIdentifier,
    timeout: Duration,
) -> MultidimResult<(Arc<dyn DatasetHandle>, DatasetMetadata)> {
    let open = async {
        let access = resolver.resolve(id).await?;
        opener.open(&access, id).await
    };

    match tokio::time::timeout(timeout, open).await {
        Ok(result) => result,
        Err(_) => Err(MultidimError::UpstreamTimeout(timeout.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> ReaderConfig {
        ReaderConfig {
            cache_url: None,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_new_with_memory_backend() {
        let service = DatasetService::new(memory_config()).unwrap();
        let stats = service.cache_stats();
        assert_eq!(stats.backend.as_deref(), Some("memory"));
        assert!(!stats.degraded);
        assert_eq!(service.histogram_options().bins, 10);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = ReaderConfig {
            histogram_bins: 0,
            ..memory_config()
        };
        assert!(matches!(
            DatasetService::new(config),
            Err(MultidimError::InvalidParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_unsupported_protocol_fails_without_compute() {
        let service = DatasetService::new(memory_config()).unwrap();
        let id = DatasetIdentifier::new("ftp://example.com/data.zarr");

        for _ in 0..2 {
            let err = service.metadata(&id).await.unwrap_err();
            assert!(matches!(err, MultidimError::UnsupportedProtocol(_)));
        }
        let stats = service.cache_stats();
        assert_eq!(stats.computes, 0);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_empty_identifier_fails_before_cache() {
        let service = DatasetService::new(memory_config()).unwrap();
        let err = service.metadata(&DatasetIdentifier::new("  ")).await.unwrap_err();
        assert!(matches!(err, MultidimError::InvalidIdentifier(_)));
        assert_eq!(service.cache_stats().misses, 0);
    }
}
