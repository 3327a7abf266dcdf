//! In-memory builder for Zarr v2/v3 stores.
//!
//! A [`StoreFixture`] is a set of object keys and their bytes. Arrays are
//! written as a single uncompressed little-endian chunk, which every Zarr
//! reader understands. The fixture can be written to a directory or put
//! into any `ObjectStore`.

use bytes::Bytes;
use object_store::{memory::InMemory, path::Path as ObjectPath, ObjectStore};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Element type of a fixture array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// numpy-style dtype string used by Zarr v2.
    pub fn v2_code(&self) -> &'static str {
        match self {
            Self::U8 => "|u1",
            Self::I16 => "<i2",
            Self::I32 => "<i4",
            Self::I64 => "<i8",
            Self::F32 => "<f4",
            Self::F64 => "<f8",
        }
    }

    /// Zarr v3 `data_type` name.
    pub fn v3_name(&self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::I16 => "int16",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }

    fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    fn default_fill(&self) -> Value {
        if self.is_float() {
            json!("NaN")
        } else {
            json!(0)
        }
    }

    fn encode(&self, data: &[f64]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() * 8);
        for &v in data {
            match self {
                Self::U8 => out.push(v as u8),
                Self::I16 => out.extend_from_slice(&(v as i16).to_le_bytes()),
                Self::I32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
                Self::I64 => out.extend_from_slice(&(v as i64).to_le_bytes()),
                Self::F32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
                Self::F64 => out.extend_from_slice(&v.to_le_bytes()),
            }
        }
        out
    }
}

/// Description of one fixture array.
#[derive(Debug, Clone)]
pub struct ArraySpec {
    pub dtype: DType,
    pub shape: Vec<u64>,
    pub dimensions: Vec<String>,
    pub data: Vec<f64>,
    pub attributes: Map<String, Value>,
    /// Explicit Zarr fill value; NaN for floats and 0 for integers when unset.
    pub fill_value: Option<Value>,
}

impl ArraySpec {
    pub fn new(dtype: DType, dimensions: &[&str], shape: &[u64], data: Vec<f64>) -> Self {
        let expected: u64 = shape.iter().product();
        assert_eq!(expected as usize, data.len(), "fixture data does not match shape {:?}", shape);
        Self {
            dtype,
            shape: shape.to_vec(),
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            data,
            attributes: Map::new(),
            fill_value: None,
        }
    }

    /// 1-D coordinate array named after its own dimension.
    pub fn coordinate(name: &str, dtype: DType, values: Vec<f64>) -> Self {
        let len = values.len() as u64;
        Self::new(dtype, &[name], &[len], values)
    }

    pub fn attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn fill_value(mut self, value: impl Into<Value>) -> Self {
        self.fill_value = Some(value.into());
        self
    }

    fn fill(&self) -> Value {
        self.fill_value.clone().unwrap_or_else(|| self.dtype.default_fill())
    }
}

fn join(parent: &str, name: &str) -> String {
    match (parent.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => parent.to_string(),
        _ => format!("{}/{}", parent, name),
    }
}

/// Keys and bytes of a Zarr store.
#[derive(Debug, Clone, Default)]
pub struct StoreFixture {
    documents: BTreeMap<String, Value>,
    chunks: BTreeMap<String, Vec<u8>>,
}

impl StoreFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a v2 group at `node` (`""` for the root).
    pub fn v2_group(&mut self, node: &str, attributes: Value) -> &mut Self {
        self.documents.insert(join(node, ".zgroup"), json!({"zarr_format": 2}));
        if attributes.as_object().map(|a| !a.is_empty()).unwrap_or(false) {
            self.documents.insert(join(node, ".zattrs"), attributes);
        }
        self
    }

    /// Add a v2 array `name` under the group at `node`.
    pub fn v2_array(&mut self, node: &str, name: &str, spec: ArraySpec) -> &mut Self {
        let base = join(node, name);
        self.documents.insert(
            join(&base, ".zarray"),
            json!({
                "zarr_format": 2,
                "shape": spec.shape,
                "chunks": spec.shape,
                "dtype": spec.dtype.v2_code(),
                "compressor": null,
                "fill_value": spec.fill(),
                "filters": null,
                "order": "C",
            }),
        );

        let mut attributes = spec.attributes.clone();
        attributes.insert("_ARRAY_DIMENSIONS".to_string(), json!(spec.dimensions));
        self.documents.insert(join(&base, ".zattrs"), Value::Object(attributes));

        let chunk_key = if spec.shape.is_empty() {
            "0".to_string()
        } else {
            vec!["0"; spec.shape.len()].join(".")
        };
        self.chunks.insert(join(&base, &chunk_key), spec.dtype.encode(&spec.data));
        self
    }

    /// Write `.zmetadata` at `node` covering everything below it.
    pub fn consolidate_v2(&mut self, node: &str) -> &mut Self {
        let metadata: Map<String, Value> = self
            .documents
            .iter()
            .filter_map(|(key, doc)| {
                let rel = if node.is_empty() {
                    key.as_str()
                } else {
                    key.strip_prefix(node)?.strip_prefix('/')?
                };
                Some((rel.to_string(), doc.clone()))
            })
            .filter(|(rel, _)| rel != ".zmetadata" && !rel.ends_with("/.zmetadata"))
            .collect();

        self.documents.insert(
            join(node, ".zmetadata"),
            json!({"zarr_consolidated_format": 1, "metadata": metadata}),
        );
        self
    }

    /// Add a v3 group at `node`.
    pub fn v3_group(&mut self, node: &str, attributes: Value) -> &mut Self {
        self.documents.insert(
            join(node, "zarr.json"),
            json!({"zarr_format": 3, "node_type": "group", "attributes": attributes}),
        );
        self
    }

    /// Add a v3 array `name` under the group at `node`.
    pub fn v3_array(&mut self, node: &str, name: &str, spec: ArraySpec) -> &mut Self {
        let base = join(node, name);
        self.documents.insert(
            join(&base, "zarr.json"),
            json!({
                "zarr_format": 3,
                "node_type": "array",
                "shape": spec.shape,
                "data_type": spec.dtype.v3_name(),
                "chunk_grid": {"name": "regular", "configuration": {"chunk_shape": spec.shape}},
                "chunk_key_encoding": {"name": "default", "configuration": {"separator": "/"}},
                "fill_value": spec.fill(),
                "codecs": [{"name": "bytes", "configuration": {"endian": "little"}}],
                "dimension_names": spec.dimensions,
                "attributes": spec.attributes,
            }),
        );

        let mut chunk_key = "c".to_string();
        for _ in &spec.shape {
            chunk_key.push_str("/0");
        }
        self.chunks.insert(join(&base, &chunk_key), spec.dtype.encode(&spec.data));
        self
    }

    /// Inline consolidated metadata into the v3 group document at `node`.
    pub fn consolidate_v3(&mut self, node: &str) -> &mut Self {
        let group_key = join(node, "zarr.json");
        let metadata: Map<String, Value> = self
            .documents
            .iter()
            .filter(|(key, _)| **key != group_key)
            .filter_map(|(key, doc)| {
                let rel = key.strip_suffix("/zarr.json")?;
                let rel = if node.is_empty() {
                    rel
                } else {
                    rel.strip_prefix(node)?.strip_prefix('/')?
                };
                Some((rel.to_string(), doc.clone()))
            })
            .collect();

        if let Some(Value::Object(group)) = self.documents.get_mut(&group_key) {
            group.insert(
                "consolidated_metadata".to_string(),
                json!({"kind": "inline", "must_understand": false, "metadata": metadata}),
            );
        }
        self
    }

    /// Drop every key starting with `prefix`.
    pub fn remove_prefix(&mut self, prefix: &str) -> &mut Self {
        self.documents.retain(|k, _| !k.starts_with(prefix));
        self.chunks.retain(|k, _| !k.starts_with(prefix));
        self
    }

    /// All keys with their bytes, sorted by key.
    pub fn entries(&self) -> Vec<(String, Vec<u8>)> {
        let mut entries: Vec<(String, Vec<u8>)> = self
            .documents
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::to_vec(v).unwrap_or_default()))
            .chain(self.chunks.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn contains(&self, key: &str) -> bool {
        self.documents.contains_key(key) || self.chunks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.documents.len() + self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the store below `dir`, creating directories as needed.
    pub fn write_to_dir(&self, dir: &Path) -> std::io::Result<()> {
        for (key, bytes) in self.entries() {
            let path = dir.join(&key);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, bytes)?;
        }
        Ok(())
    }

    /// Put every key into `store` below `prefix`.
    pub async fn put_into(&self, store: &dyn ObjectStore, prefix: &str) -> object_store::Result<()> {
        for (key, bytes) in self.entries() {
            store
                .put(&ObjectPath::from(join(prefix, &key)), Bytes::from(bytes).into())
                .await?;
        }
        Ok(())
    }

    /// A fresh in-memory store holding this fixture below `prefix`.
    pub async fn in_memory(&self, prefix: &str) -> object_store::Result<Arc<InMemory>> {
        let store = Arc::new(InMemory::new());
        self.put_into(store.as_ref(), prefix).await?;
        Ok(store)
    }
}
