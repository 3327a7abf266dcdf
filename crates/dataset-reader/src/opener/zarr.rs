//! Zarr v2/v3 engine over `zarrs` storage.
//!
//! Object stores are adapted with `zarrs_object_store`; any other zarrs
//! async storage (an Icechunk session, say) opens through
//! [`ZarrHandle::open_storage`].

use async_trait::async_trait;
use futures::future::try_join_all;
use object_store::ObjectStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs::storage::{
    AsyncListableStorageTraits, AsyncReadableListableStorage, AsyncReadableStorageTraits, StoreKey, StorePrefix,
};
use zarrs_object_store::AsyncObjectStore;

use multidim_common::{MultidimError, MultidimResult};

use super::metadata::{
    attributes_of, classify_arrays, compute_bounds_crs, join, multiscale_paths, node_type, parse_v2_array,
    parse_v3_array, sort_levels, spatial_axes, time_axis, v3_consolidated_map, NodeContents,
};
use super::time::decode_time_coordinate;
use super::{slice_bounds, ArrayEngine, DatasetHandle};
use crate::config::ConsolidatedMode;
use crate::resolver::ResolvedAccess;
use crate::types::{DatasetIdentifier, DatasetMetadata, EngineKind, SliceData, SliceSelection};

/// zarrs storage adapter over the resolved object store.
pub type ZarrStore = AsyncObjectStore<Arc<dyn ObjectStore>>;

/// Opens Zarr groups.
pub struct ZarrEngine {
    consolidated: ConsolidatedMode,
}

impl ZarrEngine {
    pub fn new(consolidated: ConsolidatedMode) -> Self {
        Self { consolidated }
    }
}

#[async_trait]
impl ArrayEngine for ZarrEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Zarr
    }

    async fn open(
        &self,
        access: &ResolvedAccess,
        id: &DatasetIdentifier,
    ) -> MultidimResult<Arc<dyn DatasetHandle>> {
        let handle = ZarrHandle::open(access, id, self.consolidated).await?;
        Ok(Arc::new(handle))
    }
}

/// An open Zarr group.
pub struct ZarrHandle {
    storage: AsyncReadableListableStorage,
    /// Dataset root inside `storage`, without surrounding slashes.
    root: String,
    node: String,
    engine: EngineKind,
    metadata: DatasetMetadata,
}

impl std::fmt::Debug for ZarrHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrHandle")
            .field("root", &self.root)
            .field("engine", &self.engine)
            .field("node", &self.node)
            .field("variables", &self.metadata.variables)
            .finish_non_exhaustive()
    }
}

impl ZarrHandle {
    #[instrument(skip(access, id), fields(root = %access.root, group = ?id.group_path()))]
    pub async fn open(
        access: &ResolvedAccess,
        id: &DatasetIdentifier,
        consolidated: ConsolidatedMode,
    ) -> MultidimResult<Self> {
        let storage: Arc<ZarrStore> = Arc::new(AsyncObjectStore::new(access.store.clone()));
        Self::open_storage(storage, access.root.as_ref(), id, consolidated, EngineKind::Zarr).await
    }

    /// Open the group of `id` below `root` in an already adapted storage.
    ///
    /// `engine` is reported in the metadata.
    pub async fn open_storage(
        storage: AsyncReadableListableStorage,
        root: &str,
        id: &DatasetIdentifier,
        consolidated: ConsolidatedMode,
        engine: EngineKind,
    ) -> MultidimResult<Self> {
        let mut handle = Self {
            storage,
            root: root.trim_matches('/').to_string(),
            node: id.group_path().unwrap_or_default(),
            engine,
            metadata: DatasetMetadata::default(),
        };

        let contents = handle.load_node(id, consolidated).await?;
        handle.metadata = handle.build_metadata(id, contents).await;

        debug!(
            variables = handle.metadata.variables.len(),
            consolidated = handle.metadata.consolidated,
            zarr_format = ?handle.metadata.zarr_format,
            "Opened Zarr group"
        );
        Ok(handle)
    }

    /// Store key for `rel` (a `/`-separated path below the dataset root).
    fn key(&self, rel: &str) -> String {
        join(&self.root, rel)
    }

    /// zarrs node path for an array in the opened group.
    fn array_path(&self, name: &str) -> String {
        format!("/{}", join(&self.root, &join(&self.node, name)))
    }

    /// Fetch and parse a JSON document; `None` when the key does not exist.
    async fn read_json(&self, rel: &str) -> MultidimResult<Option<Value>> {
        let key = self.key(rel);
        let store_key =
            StoreKey::new(key.as_str()).map_err(|e| MultidimError::InvalidIdentifier(format!("{}: {}", key, e)))?;

        let bytes = self
            .storage
            .get(&store_key)
            .await
            .map_err(|e| MultidimError::UpstreamIo(format!("{}: {}", key, e)))?;

        match bytes {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| MultidimError::InvalidMetadata(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    fn missing_node(&self, id: &DatasetIdentifier) -> MultidimError {
        if self.node.is_empty() {
            MultidimError::DatasetNotFound(format!("no Zarr group at {}", id.uri()))
        } else {
            MultidimError::group_not_found(id.uri(), &self.node)
        }
    }

    async fn load_node(&self, id: &DatasetIdentifier, mode: ConsolidatedMode) -> MultidimResult<NodeContents> {
        let v3_doc = self.read_json(&join(&self.node, "zarr.json")).await?;

        if let Some(doc) = &v3_doc {
            if node_type(doc) != Some("group") {
                return Err(if self.node.is_empty() {
                    MultidimError::InvalidMetadata(format!("{} is not a Zarr group", id.uri()))
                } else {
                    MultidimError::group_not_found(id.uri(), &self.node)
                });
            }
        }

        if mode == ConsolidatedMode::Auto {
            if let Some(contents) = self.load_consolidated(v3_doc.as_ref()).await? {
                return Ok(contents);
            }
        }

        if let Some(doc) = v3_doc {
            return self.walk_v3(&doc).await;
        }

        if self.read_json(&join(&self.node, ".zgroup")).await?.is_some() {
            return self.walk_v2().await;
        }

        Err(self.missing_node(id))
    }

    /// Consolidated metadata at the node, then at the root filtered to the node.
    async fn load_consolidated(&self, v3_doc: Option<&Value>) -> MultidimResult<Option<NodeContents>> {
        if let Some(doc) = v3_doc {
            if let Some(map) = v3_consolidated_map(doc) {
                return NodeContents::from_v3_consolidated(&attributes_of(doc), map, "");
            }
        } else if let Some(doc) = self.read_json(&join(&self.node, ".zmetadata")).await? {
            if let Some(map) = doc.get("metadata").and_then(Value::as_object) {
                return NodeContents::from_v2_consolidated(map, "");
            }
        }

        if self.node.is_empty() {
            return Ok(None);
        }

        if let Some(doc) = self.read_json("zarr.json").await? {
            if let Some(map) = v3_consolidated_map(&doc) {
                return NodeContents::from_v3_consolidated(&attributes_of(&doc), map, &self.node);
            }
            return Ok(None);
        }

        match self.read_json(".zmetadata").await? {
            Some(doc) => match doc.get("metadata").and_then(Value::as_object) {
                Some(map) => NodeContents::from_v2_consolidated(map, &self.node),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn child_names(&self) -> MultidimResult<Vec<String>> {
        let base = self.key(&self.node);
        let prefix = if base.is_empty() {
            StorePrefix::root()
        } else {
            StorePrefix::new(format!("{}/", base))
                .map_err(|e| MultidimError::InvalidIdentifier(format!("{}: {}", base, e)))?
        };

        let listing = self
            .storage
            .list_dir(&prefix)
            .await
            .map_err(|e| MultidimError::UpstreamIo(format!("listing {}: {}", prefix.as_str(), e)))?;

        let mut names: Vec<String> = listing
            .prefixes()
            .iter()
            .filter_map(|p| p.as_str().strip_prefix(prefix.as_str()))
            .map(|name| name.trim_end_matches('/').to_string())
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn walk_v2(&self) -> MultidimResult<NodeContents> {
        let names = self.child_names().await?;

        let attributes = self
            .read_json(&join(&self.node, ".zattrs"))
            .await?
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();

        let children = try_join_all(names.iter().map(|name| async move {
            let base = join(&self.node, name);
            let zarray = self.read_json(&join(&base, ".zarray")).await?;
            if let Some(zarray) = zarray {
                let zattrs = self.read_json(&join(&base, ".zattrs")).await?;
                let array = parse_v2_array(name, &zarray, zattrs.as_ref())?;
                return Ok::<_, MultidimError>((name, Some(array), false));
            }
            let is_group = self.read_json(&join(&base, ".zgroup")).await?.is_some();
            Ok((name, None, is_group))
        }))
        .await?;

        let mut contents = NodeContents {
            zarr_format: 2,
            attributes,
            ..Default::default()
        };
        for (name, array, is_group) in children {
            match array {
                Some(array) => {
                    contents.arrays.insert(name.clone(), array);
                }
                None if is_group => contents.groups.push(name.clone()),
                None => {}
            }
        }
        Ok(contents)
    }

    async fn walk_v3(&self, doc: &Value) -> MultidimResult<NodeContents> {
        let names = self.child_names().await?;

        let children = try_join_all(names.iter().map(|name| async move {
            let rel = join(&join(&self.node, name), "zarr.json");
            Ok::<_, MultidimError>((name, self.read_json(&rel).await?))
        }))
        .await?;

        let mut contents = NodeContents {
            zarr_format: 3,
            attributes: attributes_of(doc),
            ..Default::default()
        };
        for (name, child) in children {
            let Some(child) = child else {
                continue;
            };
            match node_type(&child) {
                Some("array") => {
                    contents.arrays.insert(name.clone(), parse_v3_array(name, &child)?);
                }
                Some("group") => contents.groups.push(name.clone()),
                _ => {}
            }
        }
        Ok(contents)
    }

    async fn build_metadata(&self, id: &DatasetIdentifier, contents: NodeContents) -> DatasetMetadata {
        let (variables, coordinates) = classify_arrays(&contents.arrays);

        let (mut bounds, mut crs) = (None, None);
        if let Some((x, y)) = spatial_axes(&contents.arrays, &coordinates) {
            let read = futures::try_join!(self.read_values(x, None), self.read_values(y, None));
            match read {
                Ok((xs, ys)) => (bounds, crs) = compute_bounds_crs(&contents.arrays, &variables, x, &xs, &ys),
                Err(e) => warn!(x, y, error = %e, "Failed to read spatial coordinates, bounds unset"),
            }
        }

        let time = match time_axis(&contents.arrays, &coordinates) {
            Some(name) => match self.read_values(name, None).await {
                Ok(values) => Some(decode_time_coordinate(
                    name,
                    values,
                    &contents.arrays[name].attributes,
                    id.decode_times(),
                )),
                Err(e) => {
                    warn!(coordinate = name, error = %e, "Failed to read time coordinate");
                    None
                }
            },
            None => None,
        };

        let mut multiscale_levels = multiscale_paths(&contents.attributes);
        if multiscale_levels.is_empty() && id.multiscale() {
            multiscale_levels = sort_levels(contents.groups.clone());
        }

        DatasetMetadata {
            uri: id.uri().to_string(),
            group: id.group_path(),
            engine: self.engine,
            zarr_format: Some(contents.zarr_format),
            variables,
            coordinates,
            arrays: contents.arrays,
            bounds,
            crs,
            groups: contents.groups,
            multiscale_levels,
            time,
            attributes: contents.attributes,
            consolidated: contents.consolidated,
        }
    }

    /// Read an array (or a hyperslab of it) decoded to f64.
    async fn read_values(&self, name: &str, bounds: Option<(Vec<u64>, Vec<u64>)>) -> MultidimResult<Vec<f64>> {
        let path = self.array_path(name);
        let array = Array::async_open(self.storage.clone(), &path)
            .await
            .map_err(|e| MultidimError::InvalidMetadata(format!("{}: {}", path, e)))?;

        let subset = match bounds {
            Some((start, count)) => ArraySubset::new_with_start_shape(start, count)
                .map_err(|e| MultidimError::Internal(format!("{}: {}", path, e)))?,
            None => array.subset_all(),
        };

        macro_rules! retrieve {
            ($t:ty) => {
                array
                    .async_retrieve_array_subset_elements::<$t>(&subset)
                    .await
                    .map_err(|e| MultidimError::UpstreamIo(format!("{}: {}", path, e)))?
                    .into_iter()
                    .map(|v| v as f64)
                    .collect()
            };
        }

        let values = match array.data_type() {
            DataType::Int8 => retrieve!(i8),
            DataType::Int16 => retrieve!(i16),
            DataType::Int32 => retrieve!(i32),
            DataType::Int64 => retrieve!(i64),
            DataType::UInt8 => retrieve!(u8),
            DataType::UInt16 => retrieve!(u16),
            DataType::UInt32 => retrieve!(u32),
            DataType::UInt64 => retrieve!(u64),
            DataType::Float32 => retrieve!(f32),
            DataType::Float64 => retrieve!(f64),
            other => {
                return Err(MultidimError::UnsupportedDataType(format!("{}: {:?}", name, other)));
            }
        };
        Ok(values)
    }
}

#[async_trait]
impl DatasetHandle for ZarrHandle {
    fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    #[instrument(skip(self, selection), fields(node = %self.node))]
    async fn read_slice(&self, variable: &str, selection: &SliceSelection) -> MultidimResult<SliceData> {
        let array = self.metadata.variable(variable)?;
        let (start, count) = slice_bounds(variable, &array.dimensions, &array.shape, selection)?;
        let leading = count.len().saturating_sub(2);
        let shape = count[leading..].to_vec();

        let values = self.read_values(variable, Some((start, count))).await?;
        Ok(SliceData {
            values,
            shape,
            nodata: array.nodata,
        })
    }
}
