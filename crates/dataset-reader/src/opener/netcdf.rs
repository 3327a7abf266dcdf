//! NetCDF/HDF5 engine over the native `netcdf` library.
//!
//! libnetcdf needs a file path, so the container is fetched through the
//! object store and written to a temp file. On Linux that file lives in
//! `/dev/shm` (memory-backed tmpfs). The temp file is removed when the
//! handle is dropped.

use async_trait::async_trait;
use object_store::ObjectStore;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path as FsPath, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use tracing::{debug, instrument, warn};

use multidim_common::{MultidimError, MultidimResult};

use super::metadata::{classify_arrays, compute_bounds_crs, multiscale_paths, sort_levels, spatial_axes, time_axis};
use super::time::decode_time_coordinate;
use super::{slice_bounds, ArrayEngine, DatasetHandle};
use crate::resolver::ResolvedAccess;
use crate::types::{ArrayMetadata, DatasetIdentifier, DatasetMetadata, EngineKind, SliceData, SliceSelection};

/// Silence HDF5's automatic error printing to stderr.
///
/// HDF5 prints diagnostics even for errors the caller handles (a missing
/// optional attribute, for instance). Safe to call more than once.
pub fn silence_hdf5_errors() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: H5Eset_auto2 with null handlers only disables automatic printing.
        unsafe {
            hdf5_metno_sys::h5e::H5Eset_auto2(hdf5_metno_sys::h5e::H5E_DEFAULT, None, std::ptr::null_mut());
        }
    });
}

/// Opens single-container netCDF-3/netCDF-4 datasets.
#[derive(Debug, Default)]
pub struct NetCdfEngine;

impl NetCdfEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ArrayEngine for NetCdfEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::NetCdf
    }

    #[instrument(skip(self, access, id), fields(root = %access.root))]
    async fn open(
        &self,
        access: &ResolvedAccess,
        id: &DatasetIdentifier,
    ) -> MultidimResult<Arc<dyn DatasetHandle>> {
        silence_hdf5_errors();

        let bytes = match access.store.get(&access.root).await {
            Ok(result) => result
                .bytes()
                .await
                .map_err(|e| MultidimError::UpstreamIo(format!("{}: {}", access.root, e)))?,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(MultidimError::DatasetNotFound(id.uri().to_string()));
            }
            Err(e) => return Err(MultidimError::UpstreamIo(format!("{}: {}", access.root, e))),
        };

        let file = Arc::new(TempNetCdf::write(&bytes)?);
        debug!(path = %file.path.display(), size = bytes.len(), "Staged NetCDF container");

        let node = id.group_path();
        let uri = id.uri().to_string();
        let decode_times = id.decode_times();
        let multiscale = id.multiscale();
        let staged = file.clone();

        let metadata = tokio::task::spawn_blocking(move || {
            read_metadata(&staged.path, node, uri, decode_times, multiscale)
        })
        .await
        .map_err(|e| MultidimError::Internal(format!("NetCDF metadata task failed: {}", e)))??;

        Ok(Arc::new(NetCdfHandle { file, metadata }))
    }
}

/// Temp copy of a container, removed on drop.
struct TempNetCdf {
    path: PathBuf,
}

impl TempNetCdf {
    fn write(data: &[u8]) -> MultidimResult<Self> {
        let path = get_optimal_temp_dir().join(generate_temp_filename());
        let mut file = std::fs::File::create(&path)
            .map_err(|e| MultidimError::Internal(format!("creating {}: {}", path.display(), e)))?;
        file.write_all(data)
            .map_err(|e| MultidimError::Internal(format!("writing {}: {}", path.display(), e)))?;
        Ok(Self { path })
    }
}

impl Drop for TempNetCdf {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove NetCDF temp file");
        }
    }
}

/// An open netCDF group.
pub struct NetCdfHandle {
    file: Arc<TempNetCdf>,
    metadata: DatasetMetadata,
}

#[async_trait]
impl DatasetHandle for NetCdfHandle {
    fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    async fn read_slice(&self, variable: &str, selection: &SliceSelection) -> MultidimResult<SliceData> {
        let array = self.metadata.variable(variable)?;
        let (start, count) = slice_bounds(variable, &array.dimensions, &array.shape, selection)?;

        let file = self.file.clone();
        let node = self.metadata.group.clone();
        let name = variable.to_string();
        let all = tokio::task::spawn_blocking(move || read_variable(&file.path, node.as_deref(), &name))
            .await
            .map_err(|e| MultidimError::Internal(format!("NetCDF read task failed: {}", e)))??;

        // Leading dims are pinned and trailing dims are full, so the slice is contiguous
        let mut offset = 0u64;
        let mut stride = 1u64;
        for (i, len) in array.shape.iter().enumerate().rev() {
            offset += start[i] * stride;
            stride *= len;
        }
        let len: u64 = count.iter().product();
        let (offset, len) = (offset as usize, len as usize);
        let values = all
            .get(offset..offset + len)
            .ok_or_else(|| MultidimError::InvalidMetadata(format!("{}: fewer values than its shape", variable)))?
            .to_vec();

        let leading = count.len().saturating_sub(2);
        Ok(SliceData {
            values,
            shape: count[leading..].to_vec(),
            nodata: array.nodata,
        })
    }
}

fn open_file(path: &FsPath) -> MultidimResult<netcdf::File> {
    netcdf::open(path).map_err(|e| MultidimError::InvalidMetadata(format!("failed to open NetCDF: {}", e)))
}

fn read_values(var: &netcdf::Variable) -> MultidimResult<Vec<f64>> {
    var.get_values::<f64, _>(..)
        .map_err(|e| MultidimError::UnsupportedDataType(format!("{}: {}", var.name(), e)))
}

/// Read every value of `name` in the group at `node`.
fn read_variable(path: &FsPath, node: Option<&str>, name: &str) -> MultidimResult<Vec<f64>> {
    let file = open_file(path)?;
    match node {
        None => {
            let var = file
                .variable(name)
                .ok_or_else(|| MultidimError::variable_not_found(name, &[]))?;
            read_values(&var)
        }
        Some(node) => {
            let group = file
                .group(node)
                .map_err(|e| MultidimError::InvalidMetadata(e.to_string()))?
                .ok_or_else(|| MultidimError::group_not_found(path.display().to_string(), node))?;
            let var = group
                .variable(name)
                .ok_or_else(|| MultidimError::variable_not_found(name, &[]))?;
            read_values(&var)
        }
    }
}

fn read_metadata(
    path: &FsPath,
    node: Option<String>,
    uri: String,
    decode_times: bool,
    multiscale: bool,
) -> MultidimResult<DatasetMetadata> {
    let file = open_file(path)?;

    let (arrays, attributes, groups) = match node.as_deref() {
        None => {
            let groups: Vec<String> = file
                .groups()
                .map(|groups| groups.map(|g| g.name()).collect())
                .unwrap_or_default();
            (collect_arrays(file.variables()), collect_attributes(file.attributes()), groups)
        }
        Some(node) => {
            let group = file
                .group(node)
                .map_err(|e| MultidimError::InvalidMetadata(e.to_string()))?
                .ok_or_else(|| MultidimError::group_not_found(&uri, node))?;
            let groups: Vec<String> = group.groups().map(|g| g.name()).collect();
            (collect_arrays(group.variables()), collect_attributes(group.attributes()), groups)
        }
    };
    drop(file);

    let (variables, coordinates) = classify_arrays(&arrays);
    let read = |name: &str| read_variable(path, node.as_deref(), name);

    let (mut bounds, mut crs) = (None, None);
    if let Some((x, y)) = spatial_axes(&arrays, &coordinates) {
        match read(x).and_then(|xs| read(y).map(|ys| (xs, ys))) {
            Ok((xs, ys)) => (bounds, crs) = compute_bounds_crs(&arrays, &variables, x, &xs, &ys),
            Err(e) => warn!(x, y, error = %e, "Failed to read spatial coordinates, bounds unset"),
        }
    }

    let time = time_axis(&arrays, &coordinates).and_then(|name| match read(name) {
        Ok(values) => Some(decode_time_coordinate(name, values, &arrays[name].attributes, decode_times)),
        Err(e) => {
            warn!(coordinate = name, error = %e, "Failed to read time coordinate");
            None
        }
    });

    let mut groups = groups;
    groups.sort();
    let mut multiscale_levels = multiscale_paths(&attributes);
    if multiscale_levels.is_empty() && multiscale {
        multiscale_levels = sort_levels(groups.clone());
    }

    Ok(DatasetMetadata {
        uri,
        group: node,
        engine: EngineKind::NetCdf,
        zarr_format: None,
        variables,
        coordinates,
        arrays,
        bounds,
        crs,
        groups,
        multiscale_levels,
        time,
        attributes,
        consolidated: false,
    })
}

fn collect_arrays<'f>(variables: impl Iterator<Item = netcdf::Variable<'f>>) -> BTreeMap<String, ArrayMetadata> {
    variables
        .map(|var| {
            let dims = var.dimensions();
            let shape: Vec<u64> = dims.iter().map(|d| d.len() as u64).collect();
            let chunks = var
                .chunking()
                .ok()
                .flatten()
                .map(|c| c.into_iter().map(|n| n as u64).collect())
                .unwrap_or_else(|| shape.clone());
            let attributes = collect_attributes(var.attributes());
            let nodata = ["_FillValue", "missing_value"]
                .iter()
                .find_map(|key| attributes.get(*key).and_then(super::metadata::json_number));

            let metadata = ArrayMetadata {
                dtype: format!("{:?}", var.vartype()).to_ascii_lowercase(),
                shape,
                chunks,
                dimensions: dims.iter().map(|d| d.name()).collect(),
                nodata,
                attributes,
            };
            (var.name(), metadata)
        })
        .collect()
}

fn collect_attributes<'f>(attributes: impl Iterator<Item = netcdf::Attribute<'f>>) -> Map<String, Value> {
    attributes
        .filter_map(|attr| {
            let value = attr.value().ok()?;
            Some((attr.name().to_string(), attribute_json(value)))
        })
        .collect()
}

fn number(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or_else(|| Value::String(v.to_string()))
}

fn numbers<T: Into<f64> + Copy>(values: &[T]) -> Value {
    Value::Array(values.iter().map(|&v| number(v.into())).collect())
}

fn attribute_json(value: netcdf::AttributeValue) -> Value {
    use netcdf::AttributeValue as A;
    match value {
        A::Str(s) => Value::String(s),
        A::Strs(s) => Value::Array(s.into_iter().map(Value::String).collect()),
        A::Uchar(v) => Value::from(v),
        A::Schar(v) => Value::from(v),
        A::Ushort(v) => Value::from(v),
        A::Short(v) => Value::from(v),
        A::Uint(v) => Value::from(v),
        A::Int(v) => Value::from(v),
        A::Ulonglong(v) => Value::from(v),
        A::Longlong(v) => Value::from(v),
        A::Float(v) => number(v.into()),
        A::Double(v) => number(v),
        A::Uchars(v) => numbers(&v),
        A::Schars(v) => numbers(&v),
        A::Ushorts(v) => numbers(&v),
        A::Shorts(v) => numbers(&v),
        A::Uints(v) => numbers(&v),
        A::Ints(v) => numbers(&v),
        A::Ulonglongs(v) => Value::Array(v.into_iter().map(Value::from).collect()),
        A::Longlongs(v) => Value::Array(v.into_iter().map(Value::from).collect()),
        A::Floats(v) => numbers(&v),
        A::Doubles(v) => numbers(&v),
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

/// /dev/shm when writable (Linux), else the system temp dir.
fn get_optimal_temp_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let shm_path = FsPath::new("/dev/shm");
        if shm_path.is_dir() {
            let test_path = shm_path.join(format!(".multidim_test_{}", std::process::id()));
            if std::fs::write(&test_path, b"test").is_ok() {
                let _ = std::fs::remove_file(&test_path);
                return shm_path.to_path_buf();
            }
        }
    }

    std::env::temp_dir()
}

/// Unique per process, thread and call.
fn generate_temp_filename() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let pid = std::process::id();
    let tid = std::thread::current().id();
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("multidim_{}_{:?}_{}.nc", pid, tid, count)
}
