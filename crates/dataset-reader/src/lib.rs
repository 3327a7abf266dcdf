//! Dataset access for multidimensional array stores.
//!
//! This crate opens Zarr (v2/v3) and, behind the `netcdf` feature, netCDF
//! datasets that live on local disk, S3-compatible object storage or HTTP,
//! and serves their metadata through a shared, stampede-safe cache.
//!
//! # Architecture
//!
//! ```text
//! Request (DatasetIdentifier)
//!      │
//!      ▼
//! DatasetService::metadata(id)
//!      │
//!      ├─► Fingerprint::of(id)
//!      │
//!      ├─► MetadataCache lookup (Redis or in-process LRU)
//!      │         │
//!      │         ├─► Hit: return shared metadata
//!      │         │
//!      │         └─► Miss: single-flight per fingerprint
//!      │                   │
//!      │                   ├─► Resolver: filesystem handle + engine
//!      │                   └─► DatasetOpener: engine-specific open
//!      │
//!      └─► DatasetMetadata (variables, coordinates, bounds, time)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use dataset_reader::{DatasetIdentifier, DatasetService, ReaderConfig};
//!
//! let service = DatasetService::new(ReaderConfig::from_env())?;
//!
//! let id = DatasetIdentifier::new("s3://bucket/pyramid.zarr")
//!     .with_multiscale(true)
//!     .with_multiscale_level("2");
//!
//! let metadata = service.metadata(&id).await?;
//! let histogram = service
//!     .histogram(&id, "value", &service.histogram_options())
//!     .await?;
//! ```

pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod histogram;
pub mod opener;
pub mod resolver;
pub mod service;
pub mod types;

// Re-export commonly used types at crate root
pub use cache::{BreakerState, CacheEntry, CacheSettings, CacheStats, MetadataCache};
pub use config::{ChunkAccess, ConsolidatedMode, ReaderConfig};
pub use fingerprint::Fingerprint;
pub use opener::{ArrayEngine, DatasetHandle, DatasetOpener, ZarrEngine};
pub use resolver::{FilesystemKey, FilesystemTable, ResolvedAccess, Resolver};
pub use service::DatasetService;
pub use types::{
    ArrayMetadata, DatasetIdentifier, DatasetMetadata, EngineKind, HistogramBucket, HistogramOptions,
    HistogramResult, SliceData, SliceSelection, TimeCoordinate,
};

pub use multidim_common::{BoundingBox, MultidimError, MultidimResult};
