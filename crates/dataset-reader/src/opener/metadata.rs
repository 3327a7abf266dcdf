//! Zarr metadata documents to dataset metadata.
//!
//! Parses v2 (`.zarray`, `.zattrs`, `.zmetadata`) and v3 (`zarr.json`,
//! inline `consolidated_metadata`) documents into [`NodeContents`], then
//! derives the variable/coordinate split, bounds and CRS.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use multidim_common::{BoundingBox, MultidimError, MultidimResult};

use crate::types::ArrayMetadata;

const X_NAMES: &[&str] = &["lon", "longitude", "x"];
const Y_NAMES: &[&str] = &["lat", "latitude", "y"];

/// The arrays and child groups directly under one group node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeContents {
    pub zarr_format: u8,
    pub attributes: Map<String, Value>,
    pub arrays: BTreeMap<String, ArrayMetadata>,
    pub groups: Vec<String>,
    pub consolidated: bool,
}

impl NodeContents {
    /// Extract the node at `prefix` from a v2 `.zmetadata` `metadata` map.
    ///
    /// Returns `None` when the map holds no group at `prefix`.
    pub fn from_v2_consolidated(metadata: &Map<String, Value>, prefix: &str) -> MultidimResult<Option<Self>> {
        let node_marker = if prefix.is_empty() {
            ".zgroup".to_string()
        } else {
            format!("{}/.zgroup", prefix)
        };
        if !prefix.is_empty() && !metadata.contains_key(&node_marker) {
            return Ok(None);
        }

        let mut contents = Self {
            zarr_format: 2,
            consolidated: true,
            ..Default::default()
        };

        for (key, doc) in metadata {
            let Some(rel) = strip_node_prefix(key, prefix) else {
                continue;
            };

            if rel == ".zattrs" {
                contents.attributes = as_object(doc);
                continue;
            }

            let Some((name, file)) = rel.split_once('/') else {
                continue;
            };
            if name.contains('/') || file.contains('/') {
                continue;
            }

            match file {
                ".zarray" => {
                    let attrs = metadata.get(&format!("{}/.zattrs", join(prefix, name)));
                    contents
                        .arrays
                        .insert(name.to_string(), parse_v2_array(name, doc, attrs)?);
                }
                ".zgroup" => contents.groups.push(name.to_string()),
                _ => {}
            }
        }

        contents.groups.sort();
        Ok(Some(contents))
    }

    /// Extract the node at `prefix` from a v3 inline consolidated map.
    ///
    /// `root_attributes` are the attributes of the group holding the map.
    pub fn from_v3_consolidated(
        root_attributes: &Map<String, Value>,
        metadata: &Map<String, Value>,
        prefix: &str,
    ) -> MultidimResult<Option<Self>> {
        let attributes = if prefix.is_empty() {
            root_attributes.clone()
        } else {
            match metadata.get(prefix) {
                Some(doc) if node_type(doc) == Some("group") => attributes_of(doc),
                _ => return Ok(None),
            }
        };

        let mut contents = Self {
            zarr_format: 3,
            attributes,
            consolidated: true,
            ..Default::default()
        };

        for (key, doc) in metadata {
            let Some(name) = strip_node_prefix(key, prefix) else {
                continue;
            };
            if name.is_empty() || name.contains('/') {
                continue;
            }

            match node_type(doc) {
                Some("array") => {
                    contents.arrays.insert(name.to_string(), parse_v3_array(name, doc)?);
                }
                Some("group") => contents.groups.push(name.to_string()),
                _ => {}
            }
        }

        contents.groups.sort();
        Ok(Some(contents))
    }
}

fn strip_node_prefix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        Some(key)
    } else {
        key.strip_prefix(prefix)?.strip_prefix('/')
    }
}

/// Join two node path segments, either of which may be empty.
pub fn join(parent: &str, name: &str) -> String {
    match (parent.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => parent.to_string(),
        _ => format!("{}/{}", parent, name),
    }
}

pub fn node_type(doc: &Value) -> Option<&str> {
    doc.get("node_type").and_then(Value::as_str)
}

pub fn attributes_of(doc: &Value) -> Map<String, Value> {
    doc.get("attributes").map(as_object).unwrap_or_default()
}

/// Inline consolidated metadata map of a v3 group document, if any.
pub fn v3_consolidated_map(doc: &Value) -> Option<&Map<String, Value>> {
    doc.get("consolidated_metadata")?
        .get("metadata")?
        .as_object()
}

fn as_object(doc: &Value) -> Map<String, Value> {
    doc.as_object().cloned().unwrap_or_default()
}

fn u64_list(doc: &Value, key: &str) -> Option<Vec<u64>> {
    doc.get(key)?
        .as_array()?
        .iter()
        .map(Value::as_u64)
        .collect()
}

/// Numeric value of a JSON fill value (`"NaN"`, `"Infinity"` included).
pub fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.as_str() {
            "NaN" | "nan" => Some(f64::NAN),
            "Infinity" | "inf" => Some(f64::INFINITY),
            "-Infinity" | "-inf" => Some(f64::NEG_INFINITY),
            _ => s.parse().ok(),
        },
        Value::Array(items) if items.len() == 1 => json_number(&items[0]),
        _ => None,
    }
}

fn attribute_nodata(attributes: &Map<String, Value>) -> Option<f64> {
    ["_FillValue", "missing_value"]
        .iter()
        .find_map(|key| attributes.get(*key).and_then(json_number))
}

fn default_dimensions(rank: usize) -> Vec<String> {
    (0..rank).map(|i| format!("dim_{}", i)).collect()
}

/// Readable name for a v2 numpy dtype string.
pub fn v2_dtype_name(dtype: &str) -> String {
    let code = dtype.trim_start_matches(['<', '>', '|', '=']);
    let name = match code {
        "b1" => "bool",
        "i1" => "int8",
        "i2" => "int16",
        "i4" => "int32",
        "i8" => "int64",
        "u1" => "uint8",
        "u2" => "uint16",
        "u4" => "uint32",
        "u8" => "uint64",
        "f2" => "float16",
        "f4" => "float32",
        "f8" => "float64",
        _ => code,
    };
    name.to_string()
}

/// Parse a v2 `.zarray` document plus its optional `.zattrs`.
pub fn parse_v2_array(name: &str, zarray: &Value, zattrs: Option<&Value>) -> MultidimResult<ArrayMetadata> {
    let shape = u64_list(zarray, "shape")
        .ok_or_else(|| MultidimError::InvalidMetadata(format!("{}: missing or invalid shape", name)))?;
    let chunks = u64_list(zarray, "chunks").unwrap_or_else(|| shape.clone());

    let dtype = match zarray.get("dtype") {
        Some(Value::String(s)) => v2_dtype_name(s),
        Some(other) => format!("structured{}", other),
        None => {
            return Err(MultidimError::InvalidMetadata(format!("{}: missing dtype", name)));
        }
    };

    let mut attributes = zattrs.map(as_object).unwrap_or_default();
    let dimensions = match attributes.remove("_ARRAY_DIMENSIONS") {
        Some(Value::Array(dims)) => dims
            .iter()
            .map(|d| d.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .filter(|d| d.len() == shape.len())
            .unwrap_or_else(|| default_dimensions(shape.len())),
        _ => default_dimensions(shape.len()),
    };

    let nodata = attribute_nodata(&attributes)
        .or_else(|| zarray.get("fill_value").and_then(json_number));

    Ok(ArrayMetadata {
        dtype,
        shape,
        chunks,
        dimensions,
        nodata,
        attributes,
    })
}

/// Parse a v3 array `zarr.json` document.
pub fn parse_v3_array(name: &str, doc: &Value) -> MultidimResult<ArrayMetadata> {
    let shape = u64_list(doc, "shape")
        .ok_or_else(|| MultidimError::InvalidMetadata(format!("{}: missing or invalid shape", name)))?;

    let chunks = doc
        .get("chunk_grid")
        .and_then(|g| g.get("configuration"))
        .and_then(|c| u64_list(c, "chunk_shape"))
        .unwrap_or_else(|| shape.clone());

    let dtype = match doc.get("data_type") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(o)) => o
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        _ => {
            return Err(MultidimError::InvalidMetadata(format!("{}: missing data_type", name)));
        }
    };

    let dimensions = doc
        .get("dimension_names")
        .and_then(Value::as_array)
        .filter(|dims| dims.len() == shape.len())
        .map(|dims| {
            dims.iter()
                .enumerate()
                .map(|(i, d)| d.as_str().map(str::to_string).unwrap_or_else(|| format!("dim_{}", i)))
                .collect()
        })
        .unwrap_or_else(|| default_dimensions(shape.len()));

    let attributes = attributes_of(doc);
    let nodata = attribute_nodata(&attributes);

    Ok(ArrayMetadata {
        dtype,
        shape,
        chunks,
        dimensions,
        nodata,
        attributes,
    })
}

/// Split arrays into (data variables, coordinates), both sorted.
///
/// Coordinates are arrays named after a dimension, arrays listed in a
/// `coordinates` attribute and arrays referenced as a `grid_mapping`.
pub fn classify_arrays(arrays: &BTreeMap<String, ArrayMetadata>) -> (Vec<String>, Vec<String>) {
    let mut coordinate_names: BTreeSet<&str> = BTreeSet::new();

    for array in arrays.values() {
        coordinate_names.extend(array.dimensions.iter().map(String::as_str));

        if let Some(listed) = array.attributes.get("coordinates").and_then(Value::as_str) {
            coordinate_names.extend(listed.split_whitespace());
        }
        if let Some(mapping) = array.attributes.get("grid_mapping").and_then(Value::as_str) {
            coordinate_names.insert(mapping.trim());
        }
    }

    let mut variables = Vec::new();
    let mut coordinates = Vec::new();
    for name in arrays.keys() {
        if coordinate_names.contains(name.as_str()) {
            coordinates.push(name.clone());
        } else {
            variables.push(name.clone());
        }
    }

    (variables, coordinates)
}

fn find_axis<'a>(arrays: &'a BTreeMap<String, ArrayMetadata>, coordinates: &'a [String], names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|candidate| {
        coordinates
            .iter()
            .find(|c| c.eq_ignore_ascii_case(candidate))
            .filter(|c| arrays.get(c.as_str()).map(|a| a.shape.len() == 1).unwrap_or(false))
            .map(String::as_str)
    })
}

/// Names of the 1-D (x, y) coordinate arrays, if both exist.
pub fn spatial_axes<'a>(
    arrays: &'a BTreeMap<String, ArrayMetadata>,
    coordinates: &'a [String],
) -> Option<(&'a str, &'a str)> {
    let x = find_axis(arrays, coordinates, X_NAMES)?;
    let y = find_axis(arrays, coordinates, Y_NAMES)?;
    Some((x, y))
}

/// Name of the time coordinate, if any.
pub fn time_axis<'a>(arrays: &'a BTreeMap<String, ArrayMetadata>, coordinates: &'a [String]) -> Option<&'a str> {
    let one_d = |name: &&String| arrays.get(name.as_str()).map(|a| a.shape.len() == 1).unwrap_or(false);

    if let Some(name) = coordinates.iter().filter(one_d).find(|c| c.as_str() == "time") {
        return Some(name);
    }

    coordinates
        .iter()
        .filter(one_d)
        .find(|c| {
            let attrs = &arrays[c.as_str()].attributes;
            let attr = |key: &str| attrs.get(key).and_then(Value::as_str);
            attr("standard_name") == Some("time")
                || attr("axis") == Some("T")
                || attr("units").map(|u| u.contains(" since ")).unwrap_or(false)
        })
        .map(String::as_str)
}

/// Bounds from cell-centered axis values and the CRS for them.
///
/// The CRS comes from the WKT of a variable's `grid_mapping` array; lon/lat
/// axes without one default to EPSG:4326.
pub fn compute_bounds_crs(
    arrays: &BTreeMap<String, ArrayMetadata>,
    variables: &[String],
    x_name: &str,
    xs: &[f64],
    ys: &[f64],
) -> (Option<BoundingBox>, Option<String>) {
    let bounds = BoundingBox::from_cell_centers(xs, ys);

    let from_mapping = variables.iter().find_map(|v| {
        let mapping = arrays.get(v)?.attributes.get("grid_mapping")?.as_str()?;
        let attrs = &arrays.get(mapping.trim())?.attributes;
        ["crs_wkt", "spatial_ref"]
            .iter()
            .find_map(|key| attrs.get(*key).and_then(Value::as_str))
            .map(str::to_string)
    });

    let geographic = ["lon", "longitude"]
        .iter()
        .any(|n| x_name.eq_ignore_ascii_case(n));
    let crs = from_mapping.or_else(|| geographic.then(|| "EPSG:4326".to_string()));

    (bounds, crs)
}

/// Multiscale level paths from a `multiscales` group attribute.
pub fn multiscale_paths(attributes: &Map<String, Value>) -> Vec<String> {
    attributes
        .get("multiscales")
        .and_then(Value::as_array)
        .map(|scales| {
            scales
                .iter()
                .filter_map(|s| s.get("datasets")?.as_array())
                .flatten()
                .filter_map(|d| d.get("path")?.as_str())
                .map(|p| p.trim_matches('/').to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Sort group names numerically where possible, then lexically.
pub fn sort_levels(mut groups: Vec<String>) -> Vec<String> {
    groups.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    });
    groups
}
