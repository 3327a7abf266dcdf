//! Core types for dataset access.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use multidim_common::{BoundingBox, MultidimError, MultidimResult};

/// Array-access engine used to open a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Chunked array hierarchy (Zarr v2 or v3).
    #[default]
    Zarr,
    /// Single-container netCDF (classic or HDF5-backed).
    NetCdf,
    /// Transactional Zarr repository.
    Icechunk,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zarr => "zarr",
            Self::NetCdf => "netcdf",
            Self::Icechunk => "icechunk",
        }
    }

    /// Engine implied by a path's file extension, if any.
    pub fn from_extension(path: &str) -> Option<Self> {
        let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();

        match ext.as_str() {
            "zarr" => Some(Self::Zarr),
            "nc" | "nc4" | "h5" | "hdf5" | "he5" => Some(Self::NetCdf),
            "icechunk" => Some(Self::Icechunk),
            _ => None,
        }
    }
}

impl FromStr for EngineKind {
    type Err = MultidimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zarr" => Ok(Self::Zarr),
            "netcdf" | "netcdf4" | "h5netcdf" | "hdf5" => Ok(Self::NetCdf),
            "icechunk" => Ok(Self::Icechunk),
            other => Err(MultidimError::invalid_parameter(
                "engine",
                format!("unknown engine '{}'", other),
            )),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for one logical view of a dataset.
///
/// Built once per request and never mutated afterwards; the `with_*`
/// methods consume and return the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetIdentifier {
    uri: String,
    group: Option<String>,
    engine: Option<EngineKind>,
    multiscale: bool,
    multiscale_level: Option<String>,
    decode_times: bool,
    storage_options: BTreeMap<String, String>,
}

impl DatasetIdentifier {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into().trim().to_string(),
            group: None,
            engine: None,
            multiscale: false,
            multiscale_level: None,
            decode_times: true,
            storage_options: BTreeMap::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = clean_segment(&group.into());
        self
    }

    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_multiscale(mut self, multiscale: bool) -> Self {
        self.multiscale = multiscale;
        self
    }

    pub fn with_multiscale_level(mut self, level: impl Into<String>) -> Self {
        self.multiscale_level = clean_segment(&level.into());
        self
    }

    pub fn with_decode_times(mut self, decode_times: bool) -> Self {
        self.decode_times = decode_times;
        self
    }

    pub fn with_storage_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.storage_options.insert(key.into(), value.into());
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn engine(&self) -> Option<EngineKind> {
        self.engine
    }

    pub fn multiscale(&self) -> bool {
        self.multiscale
    }

    pub fn multiscale_level(&self) -> Option<&str> {
        self.multiscale_level.as_deref()
    }

    pub fn decode_times(&self) -> bool {
        self.decode_times
    }

    pub fn storage_options(&self) -> &BTreeMap<String, String> {
        &self.storage_options
    }

    /// Node path inside the dataset: `group` joined with `multiscale_level`.
    pub fn group_path(&self) -> Option<String> {
        match (self.group.as_deref(), self.multiscale_level.as_deref()) {
            (None, None) => None,
            (Some(g), None) => Some(g.to_string()),
            (None, Some(l)) => Some(l.to_string()),
            (Some(g), Some(l)) => Some(format!("{}/{}", g, l)),
        }
    }

    /// Reject identifiers that cannot name a dataset.
    pub fn validate(&self) -> MultidimResult<()> {
        if self.uri.is_empty() {
            return Err(MultidimError::InvalidIdentifier(
                "dataset URI is empty".to_string(),
            ));
        }

        let segments = self
            .group
            .iter()
            .chain(self.multiscale_level.iter())
            .flat_map(|p| p.split('/'));
        for segment in segments {
            if segment == ".." || segment == "." {
                return Err(MultidimError::InvalidIdentifier(format!(
                    "group path may not contain '{}'",
                    segment
                )));
            }
        }

        Ok(())
    }
}

fn clean_segment(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Description of one array (data variable or coordinate).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayMetadata {
    pub dtype: String,
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    pub dimensions: Vec<String>,
    /// Value marking missing data, if any.
    pub nodata: Option<f64>,
    pub attributes: Map<String, Value>,
}

/// Time coordinate values, decoded when the calendar allows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeCoordinate {
    /// ISO-8601 timestamps.
    Decoded {
        name: String,
        values: Vec<String>,
        calendar: String,
    },
    /// Raw numeric offsets with the attributes needed to interpret them.
    Raw {
        name: String,
        values: Vec<f64>,
        #[serde(default)]
        units: Option<String>,
        #[serde(default)]
        calendar: Option<String>,
        #[serde(default)]
        attributes: Map<String, Value>,
    },
}

impl TimeCoordinate {
    pub fn name(&self) -> &str {
        match self {
            Self::Decoded { name, .. } | Self::Raw { name, .. } => name,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Decoded { values, .. } => values.len(),
            Self::Raw { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Descriptive metadata for one view of a dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetMetadata {
    pub uri: String,
    pub group: Option<String>,
    pub engine: EngineKind,
    /// 2 or 3 for Zarr, `None` for other engines.
    pub zarr_format: Option<u8>,
    /// Data variable names, sorted.
    pub variables: Vec<String>,
    pub coordinates: Vec<String>,
    /// Every array in the node keyed by name, coordinates included.
    pub arrays: BTreeMap<String, ArrayMetadata>,
    pub bounds: Option<BoundingBox>,
    pub crs: Option<String>,
    /// Direct child groups.
    pub groups: Vec<String>,
    pub multiscale_levels: Vec<String>,
    pub time: Option<TimeCoordinate>,
    pub attributes: Map<String, Value>,
    pub consolidated: bool,
}

impl DatasetMetadata {
    /// Look up a data variable, failing with the list of known variables.
    pub fn variable(&self, name: &str) -> MultidimResult<&ArrayMetadata> {
        if !self.variables.iter().any(|v| v == name) {
            return Err(MultidimError::variable_not_found(name, &self.variables));
        }
        self.arrays
            .get(name)
            .ok_or_else(|| MultidimError::variable_not_found(name, &self.variables))
    }
}

/// Index selection for the leading (non-spatial) dimensions of a variable.
///
/// Dimensions not named here are read at index 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceSelection {
    indices: BTreeMap<String, u64>,
}

impl SliceSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, dimension: impl Into<String>, index: u64) -> Self {
        self.indices.insert(dimension.into(), index);
        self
    }

    /// Parse `dim=index` entries.
    pub fn parse<'a, I>(entries: I) -> MultidimResult<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut selection = Self::new();
        for entry in entries {
            let (dim, index) = entry.split_once('=').ok_or_else(|| {
                MultidimError::invalid_parameter("sel", format!("expected dim=index, got '{}'", entry))
            })?;
            let index = index.trim().parse::<u64>().map_err(|_| {
                MultidimError::invalid_parameter("sel", format!("invalid index in '{}'", entry))
            })?;
            selection.indices.insert(dim.trim().to_string(), index);
        }
        Ok(selection)
    }

    pub fn index_for(&self, dimension: &str) -> u64 {
        self.indices.get(dimension).copied().unwrap_or(0)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.indices.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// A 2-D (or lower) slice of a variable decoded to f64.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceData {
    pub values: Vec<f64>,
    pub shape: Vec<u64>,
    pub nodata: Option<f64>,
}

/// One histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

/// Value histogram for one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramResult {
    pub variable: String,
    pub buckets: Vec<HistogramBucket>,
    /// Valid values counted into buckets.
    pub sampled: u64,
    /// Sampled values dropped as NaN or no-data.
    pub skipped: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Knobs for histogram computation.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramOptions {
    pub bins: usize,
    pub max_samples: usize,
    pub selection: SliceSelection,
}

impl Default for HistogramOptions {
    fn default() -> Self {
        Self {
            bins: 10,
            max_samples: 1_000_000,
            selection: SliceSelection::default(),
        }
    }
}
