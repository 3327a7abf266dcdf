//! Dataset opening.
//!
//! An [`ArrayEngine`] turns a [`ResolvedAccess`] into a [`DatasetHandle`]
//! carrying the dataset's metadata. The [`DatasetOpener`] keeps one engine
//! per [`EngineKind`] and dispatches on the resolved kind.

mod icechunk;
mod metadata;
#[cfg(feature = "netcdf")]
mod netcdf;
mod time;
mod zarr;

#[cfg(feature = "icechunk")]
pub use self::icechunk::IcechunkEngine;
pub use self::icechunk::{RepoLocation, DEFAULT_BRANCH};
pub use metadata::{classify_arrays, compute_bounds_crs, NodeContents};
#[cfg(feature = "netcdf")]
pub use self::netcdf::NetCdfEngine;
pub use time::decode_time_coordinate;
pub use zarr::{ZarrEngine, ZarrHandle};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use multidim_common::{MultidimError, MultidimResult};

use crate::config::{ConsolidatedMode, ReaderConfig};
use crate::resolver::ResolvedAccess;
use crate::types::{DatasetIdentifier, DatasetMetadata, EngineKind, SliceData, SliceSelection};

/// An open dataset.
///
/// Handles are `Send + Sync`, but concurrent `read_slice` calls get no
/// guarantee beyond what the storage backend offers; open one handle per
/// parallel reader.
#[async_trait]
pub trait DatasetHandle: Send + Sync {
    fn metadata(&self) -> &DatasetMetadata;

    fn list_variables(&self) -> Vec<String> {
        self.metadata().variables.clone()
    }

    /// Read one variable with every leading dimension fixed by `selection`
    /// (index 0 unless named) and the trailing two dimensions in full.
    async fn read_slice(&self, variable: &str, selection: &SliceSelection) -> MultidimResult<SliceData>;
}

/// Opens datasets of one engine kind.
#[async_trait]
pub trait ArrayEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    async fn open(
        &self,
        access: &ResolvedAccess,
        id: &DatasetIdentifier,
    ) -> MultidimResult<Arc<dyn DatasetHandle>>;
}

/// Engine registry.
pub struct DatasetOpener {
    engines: HashMap<EngineKind, Arc<dyn ArrayEngine>>,
}

impl DatasetOpener {
    /// Registry with every built-in engine and default settings.
    pub fn new(consolidated: ConsolidatedMode) -> Self {
        Self::from_config(&ReaderConfig {
            consolidated,
            ..Default::default()
        })
    }

    /// Registry with every built-in engine.
    ///
    /// netCDF and Icechunk engines are present only when their features are
    /// enabled; without them those datasets fail with `EngineUnavailable`.
    pub fn from_config(config: &ReaderConfig) -> Self {
        let mut opener = Self::empty();
        opener.register(Arc::new(ZarrEngine::new(config.consolidated)));
        #[cfg(feature = "netcdf")]
        opener.register(Arc::new(NetCdfEngine::new()));
        #[cfg(feature = "icechunk")]
        opener.register(Arc::new(IcechunkEngine::new(
            config.consolidated,
            config.authorized_chunk_access.clone(),
        )));
        opener
    }

    pub fn empty() -> Self {
        Self {
            engines: HashMap::new(),
        }
    }

    /// Add or replace the engine for its kind.
    pub fn register(&mut self, engine: Arc<dyn ArrayEngine>) {
        self.engines.insert(engine.kind(), engine);
    }

    pub fn supports(&self, kind: EngineKind) -> bool {
        self.engines.contains_key(&kind)
    }

    #[instrument(skip(self, access, id), fields(uri = %id.uri(), engine = %access.engine))]
    pub async fn open(
        &self,
        access: &ResolvedAccess,
        id: &DatasetIdentifier,
    ) -> MultidimResult<(Arc<dyn DatasetHandle>, DatasetMetadata)> {
        let engine = self
            .engines
            .get(&access.engine)
            .ok_or_else(|| MultidimError::EngineUnavailable(access.engine.to_string()))?;

        let handle = engine.open(access, id).await?;
        let metadata = handle.metadata().clone();
        debug!(variables = metadata.variables.len(), "Opened dataset");

        Ok((handle, metadata))
    }
}

/// Start and shape of the hyperslab `read_slice` reads.
///
/// Leading dimensions are pinned to one index, the trailing two are read
/// in full. Fails for unknown dimension names and out-of-range indices.
pub fn slice_bounds(
    variable: &str,
    dimensions: &[String],
    shape: &[u64],
    selection: &SliceSelection,
) -> MultidimResult<(Vec<u64>, Vec<u64>)> {
    let leading = shape.len().saturating_sub(2);

    for dim in selection.dimensions() {
        let position = dimensions.iter().position(|d| d == dim);
        if !matches!(position, Some(i) if i < leading) {
            return Err(MultidimError::invalid_parameter(
                "sel",
                format!("'{}' is not a leading dimension of {}", dim, variable),
            ));
        }
    }

    let mut start = Vec::with_capacity(shape.len());
    let mut count = Vec::with_capacity(shape.len());
    for (i, &len) in shape.iter().enumerate() {
        if i < leading {
            let dim = dimensions.get(i).map(String::as_str).unwrap_or("");
            let index = selection.index_for(dim);
            if index >= len {
                return Err(MultidimError::invalid_parameter(
                    "sel",
                    format!("index {} out of range for {} (size {})", index, dim, len),
                ));
            }
            start.push(index);
            count.push(1);
        } else {
            start.push(0);
            count.push(len);
        }
    }

    Ok((start, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_slice_bounds_pins_leading_dims() {
        let (start, count) = slice_bounds(
            "t2m",
            &dims(&["time", "lat", "lon"]),
            &[10, 36, 72],
            &SliceSelection::new().with_index("time", 4),
        )
        .unwrap();
        assert_eq!(start, vec![4, 0, 0]);
        assert_eq!(count, vec![1, 36, 72]);
    }

    #[test]
    fn test_slice_bounds_defaults_and_low_rank() {
        let (start, count) =
            slice_bounds("v", &dims(&["time", "level", "y", "x"]), &[3, 2, 4, 5], &SliceSelection::new()).unwrap();
        assert_eq!(start, vec![0, 0, 0, 0]);
        assert_eq!(count, vec![1, 1, 4, 5]);

        let (start, count) = slice_bounds("v", &dims(&["x"]), &[7], &SliceSelection::new()).unwrap();
        assert_eq!(start, vec![0]);
        assert_eq!(count, vec![7]);
    }

    #[test]
    fn test_slice_bounds_rejects_bad_selection() {
        let shape = [10, 36, 72];
        let names = dims(&["time", "lat", "lon"]);

        let err = slice_bounds("v", &names, &shape, &SliceSelection::new().with_index("time", 10)).unwrap_err();
        assert!(matches!(err, MultidimError::InvalidParameter { .. }));

        let err = slice_bounds("v", &names, &shape, &SliceSelection::new().with_index("lat", 1)).unwrap_err();
        assert!(matches!(err, MultidimError::InvalidParameter { .. }));

        let err = slice_bounds("v", &names, &shape, &SliceSelection::new().with_index("member", 0)).unwrap_err();
        assert!(matches!(err, MultidimError::InvalidParameter { .. }));
    }

    #[test]
    fn test_empty_registry_reports_engine_unavailable() {
        let opener = DatasetOpener::empty();
        assert!(!opener.supports(EngineKind::Zarr));

        let opener = DatasetOpener::new(ConsolidatedMode::Auto);
        assert!(opener.supports(EngineKind::Zarr));
        assert_eq!(opener.supports(EngineKind::Icechunk), cfg!(feature = "icechunk"));
        assert_eq!(opener.supports(EngineKind::NetCdf), cfg!(feature = "netcdf"));
    }
}
