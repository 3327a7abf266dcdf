//! Protocol and engine resolution.
//!
//! Turns a [`DatasetIdentifier`] into a [`ResolvedAccess`]: which storage
//! backend holds the bytes, which engine understands them, and a reusable
//! object store handle rooted where the dataset lives.

use futures::future::join_all;
use object_store::{path::Path, ObjectStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use url::Url;

use multidim_common::{MultidimError, MultidimResult};
use storage::{build_filesystem, FilesystemKind, StorageOptions};

use crate::fingerprint::stable_hash_hex;
use crate::types::{DatasetIdentifier, EngineKind};

const ZARR_MARKERS: &[&str] = &["zarr.json", ".zgroup", ".zmetadata", ".zarray"];
const ICECHUNK_MARKERS: &[&str] = &["repo", "config.yaml"];

/// Memo key for a filesystem handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilesystemKey {
    pub kind: FilesystemKind,
    pub authority: String,
    /// Hash over every option, credentials included.
    pub options_hash: String,
}

impl FilesystemKey {
    pub fn new(kind: FilesystemKind, authority: &str, options: &StorageOptions) -> Self {
        Self {
            kind,
            authority: authority.to_string(),
            options_hash: stable_hash_hex(options.iter()),
        }
    }
}

/// In-process table of filesystem handles.
///
/// Handles are built once per key and reused for the life of the process.
/// Entries are never evicted.
#[derive(Default)]
pub struct FilesystemTable {
    handles: RwLock<HashMap<FilesystemKey, Arc<dyn ObjectStore>>>,
}

impl FilesystemTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register a handle, e.g. an in-memory store for tests.
    pub async fn register(
        &self,
        kind: FilesystemKind,
        authority: &str,
        options: &StorageOptions,
        store: Arc<dyn ObjectStore>,
    ) {
        let key = FilesystemKey::new(kind, authority, options);
        self.handles.write().await.insert(key, store);
    }

    /// Pre-register a handle for identifiers carrying no storage options.
    pub async fn register_default(
        &self,
        kind: FilesystemKind,
        authority: &str,
        store: Arc<dyn ObjectStore>,
    ) -> MultidimResult<()> {
        let options = StorageOptions::normalize(std::iter::empty(), kind)?;
        self.register(kind, authority, &options, store).await;
        Ok(())
    }

    /// Fetch the handle for `key`, building it with `scheme` on first use.
    pub async fn get_or_build(
        &self,
        key: &FilesystemKey,
        scheme: &str,
        options: &StorageOptions,
    ) -> MultidimResult<Arc<dyn ObjectStore>> {
        if let Some(store) = self.handles.read().await.get(key) {
            return Ok(Arc::clone(store));
        }

        let mut handles = self.handles.write().await;
        if let Some(store) = handles.get(key) {
            return Ok(Arc::clone(store));
        }

        let store = build_filesystem(key.kind, scheme, &key.authority, options)?;
        handles.insert(key.clone(), Arc::clone(&store));
        Ok(store)
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }
}

/// Where and how to read a dataset.
#[derive(Clone)]
pub struct ResolvedAccess {
    pub filesystem: FilesystemKind,
    /// Bucket for object stores, `host[:port]` for HTTP, empty otherwise.
    pub authority: String,
    pub engine: EngineKind,
    pub options: StorageOptions,
    pub store: Arc<dyn ObjectStore>,
    /// Dataset root inside `store`.
    pub root: Path,
}

impl std::fmt::Debug for ResolvedAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedAccess")
            .field("filesystem", &self.filesystem)
            .field("authority", &self.authority)
            .field("engine", &self.engine)
            .field("root", &self.root.as_ref())
            .finish_non_exhaustive()
    }
}

/// Parsed location of a dataset.
#[derive(Debug, Clone, PartialEq)]
struct Location {
    kind: FilesystemKind,
    scheme: String,
    authority: String,
    root: Path,
}

fn parse_location(uri: &str) -> MultidimResult<Location> {
    let Some((scheme, _)) = uri.split_once("://") else {
        return local_location(uri);
    };
    let scheme = scheme.to_ascii_lowercase();
    let kind = FilesystemKind::from_scheme(Some(&scheme))?;

    let url = Url::parse(uri)
        .map_err(|e| MultidimError::InvalidIdentifier(format!("{}: {}", uri, e)))?;

    if kind == FilesystemKind::Local {
        let path = url
            .to_file_path()
            .map_err(|_| MultidimError::InvalidIdentifier(format!("not a file path: {}", uri)))?;
        return local_location(&path.to_string_lossy());
    }

    let mut authority = url.host_str().unwrap_or("").to_string();
    if let Some(port) = url.port() {
        authority = format!("{}:{}", authority, port);
    }

    let root = Path::from_url_path(url.path().trim_end_matches('/'))
        .map_err(|e| MultidimError::InvalidIdentifier(format!("{}: {}", uri, e)))?;

    Ok(Location {
        kind,
        scheme,
        authority,
        root,
    })
}

fn local_location(path: &str) -> MultidimResult<Location> {
    let root = Path::from_filesystem_path(path)
        .map_err(|e| MultidimError::DatasetNotFound(format!("{}: {}", path, e)))?;

    Ok(Location {
        kind: FilesystemKind::Local,
        scheme: "file".to_string(),
        authority: String::new(),
        root,
    })
}

/// Resolves identifiers against a shared filesystem table.
#[derive(Clone)]
pub struct Resolver {
    table: Arc<FilesystemTable>,
}

impl Resolver {
    pub fn new(table: Arc<FilesystemTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<FilesystemTable> {
        &self.table
    }

    /// Resolve the filesystem handle and engine for `id`.
    ///
    /// Engine selection: explicit override, then file extension, then a
    /// lookup of marker keys at the dataset root. Array data is never read.
    #[instrument(skip(self, id), fields(uri = %id.uri()))]
    pub async fn resolve(&self, id: &DatasetIdentifier) -> MultidimResult<ResolvedAccess> {
        id.validate()?;

        let location = parse_location(id.uri())?;
        let options = StorageOptions::normalize(id.storage_options(), location.kind)?;
        let key = FilesystemKey::new(location.kind, &location.authority, &options);
        let store = self
            .table
            .get_or_build(&key, &location.scheme, &options)
            .await?;

        let engine = match id.engine() {
            Some(engine) => engine,
            None => match EngineKind::from_extension(location.root.as_ref()) {
                Some(engine) => engine,
                None => detect_engine(store.as_ref(), &location.root, id.uri()).await?,
            },
        };

        debug!(filesystem = %location.kind, engine = %engine, root = %location.root, "Resolved dataset");

        Ok(ResolvedAccess {
            filesystem: location.kind,
            authority: location.authority,
            engine,
            options,
            store,
            root: location.root,
        })
    }
}

async fn exists(store: &dyn ObjectStore, path: &Path) -> MultidimResult<bool> {
    match store.head(path).await {
        Ok(_) => Ok(true),
        Err(object_store::Error::NotFound { .. }) => Ok(false),
        Err(e) => Err(MultidimError::UpstreamIo(format!("{}: {}", path, e))),
    }
}

async fn any_exists(store: &dyn ObjectStore, root: &Path, names: &[&str]) -> (bool, Option<MultidimError>) {
    let checks = join_all(names.iter().map(|name| {
        let path = child(root, name);
        async move { exists(store, &path).await }
    }))
    .await;

    let mut last_error = None;
    for check in checks {
        match check {
            Ok(true) => return (true, None),
            Ok(false) => {}
            Err(e) => last_error = Some(e),
        }
    }
    (false, last_error)
}

fn child(root: &Path, name: &str) -> Path {
    if root.as_ref().is_empty() {
        Path::from(name)
    } else {
        root.child(name)
    }
}

const NETCDF_CLASSIC: &[u8] = b"CDF";
const HDF5_SIGNATURE: &[u8] = b"\x89HDF\r\n\x1a\n";

/// True for netCDF classic (`CDF` + version 1, 2 or 5) or HDF5 magic bytes.
pub fn is_netcdf_signature(head: &[u8]) -> bool {
    if head.starts_with(HDF5_SIGNATURE) {
        return true;
    }
    head.len() >= 4 && head.starts_with(NETCDF_CLASSIC) && matches!(head[3], 1 | 2 | 5)
}

/// Identify the engine from marker keys at `root`.
async fn detect_engine(store: &dyn ObjectStore, root: &Path, uri: &str) -> MultidimResult<EngineKind> {
    let mut last_error = None;

    let (found, err) = any_exists(store, root, ZARR_MARKERS).await;
    if found {
        return Ok(EngineKind::Zarr);
    }
    last_error = err.or(last_error);

    let (found, err) = any_exists(store, root, ICECHUNK_MARKERS).await;
    if found {
        return Ok(EngineKind::Icechunk);
    }
    last_error = err.or(last_error);

    let listing = if root.as_ref().is_empty() {
        store.list_with_delimiter(None).await
    } else {
        store.list_with_delimiter(Some(root)).await
    };
    match listing {
        Ok(listing) => {
            let dirs: Vec<&str> = listing
                .common_prefixes
                .iter()
                .filter_map(|p| p.filename())
                .collect();
            if dirs.contains(&"refs") && dirs.contains(&"snapshots") {
                return Ok(EngineKind::Icechunk);
            }
        }
        Err(object_store::Error::NotFound { .. }) => {}
        Err(e) => last_error = Some(MultidimError::UpstreamIo(format!("{}: {}", root, e))),
    }

    if !root.as_ref().is_empty() {
        match store.get_range(root, 0..8).await {
            Ok(head) if is_netcdf_signature(&head) => return Ok(EngineKind::NetCdf),
            Ok(_) | Err(object_store::Error::NotFound { .. }) => {}
            // Directories and short objects land here on most backends
            Err(e) => debug!(error = %e, "Signature read failed"),
        }
    }

    match last_error {
        Some(e) => Err(e),
        None => Err(MultidimError::AmbiguousEngine(uri.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::memory::InMemory;

    async fn memory_table(authority: &str) -> (Arc<FilesystemTable>, Arc<InMemory>) {
        let table = Arc::new(FilesystemTable::new());
        let store = Arc::new(InMemory::new());
        table
            .register_default(FilesystemKind::Memory, authority, store.clone())
            .await
            .unwrap();
        (table, store)
    }

    async fn put(store: &InMemory, path: &str, data: &'static [u8]) {
        store
            .put(&Path::from(path), Bytes::from_static(data).into())
            .await
            .unwrap();
    }

    #[test]
    fn test_parse_object_store_locations() {
        let loc = parse_location("s3://bucket/path/to/data.zarr/").unwrap();
        assert_eq!(loc.kind, FilesystemKind::ObjectStore);
        assert_eq!(loc.authority, "bucket");
        assert_eq!(loc.root.as_ref(), "path/to/data.zarr");

        let loc = parse_location("store://bucket/data.zarr").unwrap();
        assert_eq!(loc.kind, FilesystemKind::ObjectStore);
        assert_eq!(loc.authority, "bucket");

        let loc = parse_location("http://localhost:8080/data/a.zarr").unwrap();
        assert_eq!(loc.kind, FilesystemKind::Http);
        assert_eq!(loc.authority, "localhost:8080");
        assert_eq!(loc.root.as_ref(), "data/a.zarr");
    }

    #[test]
    fn test_unsupported_scheme() {
        assert_eq!(
            parse_location("ftp://host/a.zarr").unwrap_err(),
            MultidimError::UnsupportedProtocol("ftp".to_string())
        );
    }

    #[test]
    fn test_missing_local_path_is_not_found() {
        let err = parse_location("/definitely/not/here.zarr").unwrap_err();
        assert!(matches!(err, MultidimError::DatasetNotFound(_)));
    }

    #[test]
    fn test_local_paths_and_file_urls_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zarr");
        std::fs::create_dir(&path).unwrap();

        let plain = parse_location(&path.to_string_lossy()).unwrap();
        let url = parse_location(&format!("file://{}", path.display())).unwrap();
        assert_eq!(plain, url);
        assert_eq!(plain.kind, FilesystemKind::Local);
    }

    #[test]
    fn test_netcdf_signatures() {
        assert!(is_netcdf_signature(b"CDF\x01rest"));
        assert!(is_netcdf_signature(b"CDF\x02rest"));
        assert!(is_netcdf_signature(b"CDF\x05rest"));
        assert!(!is_netcdf_signature(b"CDF\x03rest"));
        assert!(is_netcdf_signature(b"\x89HDF\r\n\x1a\n"));
        assert!(!is_netcdf_signature(b"{\"zarr"));
    }

    #[tokio::test]
    async fn test_extension_wins_without_marker_lookup() {
        let (table, _store) = memory_table("bucket").await;
        let resolver = Resolver::new(table);

        // Nothing stored: the extension alone decides
        let access = resolver
            .resolve(&DatasetIdentifier::new("memory://bucket/data.zarr"))
            .await
            .unwrap();
        assert_eq!(access.engine, EngineKind::Zarr);
        assert_eq!(access.filesystem, FilesystemKind::Memory);
        assert_eq!(access.root.as_ref(), "data.zarr");
    }

    #[tokio::test]
    async fn test_override_wins_over_extension() {
        let (table, _store) = memory_table("bucket").await;
        let access = Resolver::new(table)
            .resolve(&DatasetIdentifier::new("memory://bucket/data.zarr").with_engine(EngineKind::Icechunk))
            .await
            .unwrap();
        assert_eq!(access.engine, EngineKind::Icechunk);
    }

    #[tokio::test]
    async fn test_marker_detection() {
        let (table, store) = memory_table("bucket").await;
        put(&store, "v2/.zgroup", b"{\"zarr_format\":2}").await;
        put(&store, "v3/zarr.json", b"{}").await;
        put(&store, "repo1/refs/branch.main/ref.json", b"{}").await;
        put(&store, "repo1/snapshots/ABC", b"x").await;
        put(&store, "file1", b"\x89HDF\r\n\x1a\n....").await;
        put(&store, "other/readme.txt", b"hello").await;

        let resolver = Resolver::new(table);
        let engine_of = |path: &'static str| {
            let resolver = resolver.clone();
            async move {
                resolver
                    .resolve(&DatasetIdentifier::new(format!("memory://bucket/{}", path)))
                    .await
                    .map(|a| a.engine)
            }
        };

        assert_eq!(engine_of("v2").await.unwrap(), EngineKind::Zarr);
        assert_eq!(engine_of("v3").await.unwrap(), EngineKind::Zarr);
        assert_eq!(engine_of("repo1").await.unwrap(), EngineKind::Icechunk);
        assert_eq!(engine_of("file1").await.unwrap(), EngineKind::NetCdf);
        assert!(matches!(
            engine_of("other").await.unwrap_err(),
            MultidimError::AmbiguousEngine(_)
        ));
    }

    #[tokio::test]
    async fn test_handles_are_memoized_per_options() {
        let table = Arc::new(FilesystemTable::new());
        let resolver = Resolver::new(Arc::clone(&table));

        let a = DatasetIdentifier::new("memory://one/a.zarr");
        let b = DatasetIdentifier::new("memory://one/b.zarr");
        let c = DatasetIdentifier::new("memory://two/a.zarr");

        let first = resolver.resolve(&a).await.unwrap();
        let second = resolver.resolve(&b).await.unwrap();
        resolver.resolve(&c).await.unwrap();

        assert!(Arc::ptr_eq(&first.store, &second.store));
        assert_eq!(table.len().await, 2);
    }

    #[tokio::test]
    async fn test_registered_handle_is_used() {
        let (table, store) = memory_table("bucket").await;
        put(&store, "x.zarr/zarr.json", b"{}").await;

        let access = Resolver::new(table)
            .resolve(&DatasetIdentifier::new("memory://bucket/x.zarr"))
            .await
            .unwrap();
        assert!(exists(access.store.as_ref(), &Path::from("x.zarr/zarr.json"))
            .await
            .unwrap());
    }
}
