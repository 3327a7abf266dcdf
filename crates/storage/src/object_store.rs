//! Object store construction for dataset access.
//!
//! Maps a filesystem kind plus normalized storage options onto a concrete
//! `object_store` backend (local disk, S3-compatible, HTTP, in-memory).

use object_store::{
    aws::{AmazonS3Builder, AmazonS3ConfigKey},
    http::HttpBuilder,
    local::LocalFileSystem,
    memory::InMemory,
    ClientOptions, ObjectStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use multidim_common::{MultidimError, MultidimResult};

/// Storage backend family a dataset identifier maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemKind {
    Local,
    ObjectStore,
    Http,
    Memory,
}

impl FilesystemKind {
    /// Map a URI scheme to a filesystem kind. `None` means a plain path.
    pub fn from_scheme(scheme: Option<&str>) -> MultidimResult<Self> {
        match scheme.map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("file") => Ok(Self::Local),
            Some("s3") | Some("s3a") | Some("store") => Ok(Self::ObjectStore),
            Some("http") | Some("https") => Ok(Self::Http),
            Some("memory") => Ok(Self::Memory),
            Some(other) => Err(MultidimError::UnsupportedProtocol(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::ObjectStore => "object_store",
            Self::Http => "http",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const CREDENTIAL_KEYS: &[&str] = &["access_key_id", "secret_access_key", "session_token"];

const BOOLEAN_KEYS: &[&str] = &[
    "anonymous",
    "allow_http",
    "skip_signature",
    "virtual_hosted_style_request",
    "requester_pays",
];

fn canonical_key(key: &str) -> String {
    let key = key.trim().to_ascii_lowercase();
    match key.as_str() {
        "aws_access_key_id" | "key" => "access_key_id".to_string(),
        "aws_secret_access_key" | "secret" => "secret_access_key".to_string(),
        "endpoint_url" | "aws_endpoint" | "aws_endpoint_url" => "endpoint".to_string(),
        "aws_region" => "region".to_string(),
        "token" | "aws_session_token" => "session_token".to_string(),
        "anon" => "anonymous".to_string(),
        _ => key,
    }
}

fn canonical_bool(value: &str) -> Option<&'static str> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some("true"),
        "false" | "0" | "no" | "off" => Some("false"),
        _ => None,
    }
}

/// Normalized storage options.
///
/// Keys are lowercased and aliased, values trimmed, booleans canonicalized
/// and defaults filled, so that semantically identical option sets compare
/// (and hash) equal. Iteration order is sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageOptions {
    entries: BTreeMap<String, String>,
}

impl StorageOptions {
    /// Normalize raw user options for the given filesystem kind.
    pub fn normalize<'a, I>(raw: I, kind: FilesystemKind) -> MultidimResult<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut entries = BTreeMap::new();

        for (key, value) in raw {
            let key = canonical_key(key);
            let value = value.trim();

            let value = if BOOLEAN_KEYS.contains(&key.as_str()) {
                canonical_bool(value)
                    .ok_or_else(|| {
                        MultidimError::invalid_parameter(
                            key.clone(),
                            format!("expected a boolean, got '{}'", value),
                        )
                    })?
                    .to_string()
            } else {
                value.to_string()
            };

            entries.insert(key, value);
        }

        if kind == FilesystemKind::ObjectStore {
            if !entries.contains_key("region") {
                let region = std::env::var("AWS_REGION")
                    .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
                    .unwrap_or_else(|_| "us-east-1".to_string());
                entries.insert("region".to_string(), region);
            }

            if !entries.contains_key("allow_http") {
                let plain_http = entries
                    .get("endpoint")
                    .map(|e| e.to_ascii_lowercase().starts_with("http://"))
                    .unwrap_or(false);
                entries.insert("allow_http".to_string(), plain_http.to_string());
            }
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in key order, credentials included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries in key order with credentials removed.
    pub fn public_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(k, _)| !is_credential(k))
    }
}

/// True for option keys holding secrets.
pub fn is_credential(key: &str) -> bool {
    CREDENTIAL_KEYS.contains(&key)
}

/// Build an object store for `kind`.
///
/// `authority` is the bucket for object stores and `host[:port]` for HTTP;
/// it is ignored for local and memory stores. Local stores are rooted at
/// `/` so dataset paths stay absolute.
#[instrument(skip(options), fields(kind = %kind, authority = %authority))]
pub fn build_filesystem(
    kind: FilesystemKind,
    scheme: &str,
    authority: &str,
    options: &StorageOptions,
) -> MultidimResult<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match kind {
        FilesystemKind::Local => Arc::new(LocalFileSystem::new()),
        FilesystemKind::Memory => Arc::new(InMemory::new()),
        FilesystemKind::ObjectStore => Arc::new(build_s3(authority, options)?),
        FilesystemKind::Http => {
            let url = format!("{}://{}", scheme, authority);
            let client_options = ClientOptions::new().with_allow_http(scheme == "http");

            let store = HttpBuilder::new()
                .with_url(url)
                .with_client_options(client_options)
                .build()
                .map_err(|e| {
                    MultidimError::UpstreamIo(format!("Failed to create HTTP client: {}", e))
                })?;
            Arc::new(store)
        }
    };

    debug!("Built filesystem handle");
    Ok(store)
}

fn build_s3(
    bucket: &str,
    options: &StorageOptions,
) -> MultidimResult<object_store::aws::AmazonS3> {
    if bucket.is_empty() {
        return Err(MultidimError::InvalidIdentifier(
            "object store URI has no bucket".to_string(),
        ));
    }

    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

    for (key, value) in options.iter() {
        builder = match key {
            "region" => builder.with_region(value),
            "endpoint" => builder.with_endpoint(value),
            "access_key_id" => builder.with_access_key_id(value),
            "secret_access_key" => builder.with_secret_access_key(value),
            "session_token" => builder.with_token(value),
            "allow_http" => builder.with_allow_http(value == "true"),
            "anonymous" => {
                if value == "true" {
                    apply_s3_key(builder, "aws_skip_signature", "true")
                } else {
                    builder
                }
            }
            other => apply_s3_key(builder, other, value),
        };
    }

    builder
        .build()
        .map_err(|e| MultidimError::UpstreamIo(format!("Failed to create S3 client: {}", e)))
}

fn apply_s3_key(builder: AmazonS3Builder, key: &str, value: &str) -> AmazonS3Builder {
    match key.parse::<AmazonS3ConfigKey>() {
        Ok(config_key) => builder.with_config(config_key, value),
        Err(_) => {
            warn!(option = %key, "Ignoring unknown S3 storage option");
            builder
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_scheme_mapping() {
        assert_eq!(FilesystemKind::from_scheme(None).unwrap(), FilesystemKind::Local);
        assert_eq!(FilesystemKind::from_scheme(Some("file")).unwrap(), FilesystemKind::Local);
        for scheme in ["s3", "S3A", "store"] {
            assert_eq!(
                FilesystemKind::from_scheme(Some(scheme)).unwrap(),
                FilesystemKind::ObjectStore
            );
        }
        assert_eq!(FilesystemKind::from_scheme(Some("https")).unwrap(), FilesystemKind::Http);
        assert_eq!(FilesystemKind::from_scheme(Some("memory")).unwrap(), FilesystemKind::Memory);
        assert_eq!(
            FilesystemKind::from_scheme(Some("ftp")).unwrap_err(),
            MultidimError::UnsupportedProtocol("ftp".to_string())
        );
    }

    #[test]
    fn test_aliases_normalize_to_same_options() {
        let a = StorageOptions::normalize(
            &raw(&[
                ("AWS_ACCESS_KEY_ID", " AKIA "),
                ("endpoint_url", "http://minio:9000"),
                ("anon", "1"),
                ("region", "eu-west-1"),
            ]),
            FilesystemKind::ObjectStore,
        )
        .unwrap();
        let b = StorageOptions::normalize(
            &raw(&[
                ("key", "AKIA"),
                ("endpoint", "http://minio:9000"),
                ("anonymous", "True"),
                ("aws_region", "eu-west-1"),
            ]),
            FilesystemKind::ObjectStore,
        )
        .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.get("access_key_id"), Some("AKIA"));
        assert!(a.flag("anonymous"));
        // plain http endpoint implies allow_http
        assert!(a.flag("allow_http"));
    }

    #[test]
    fn test_region_default_filled_for_object_store_only() {
        let s3 = StorageOptions::normalize(&raw(&[]), FilesystemKind::ObjectStore).unwrap();
        assert!(s3.get("region").is_some());
        assert_eq!(s3.get("allow_http"), Some("false"));

        let local = StorageOptions::normalize(&raw(&[]), FilesystemKind::Local).unwrap();
        assert!(local.is_empty());
    }

    #[test]
    fn test_public_entries_exclude_credentials() {
        let opts = StorageOptions::normalize(
            &raw(&[
                ("secret", "hunter2"),
                ("token", "abc"),
                ("aws_access_key_id", "AKIA"),
                ("endpoint", "https://s3.example.com"),
            ]),
            FilesystemKind::ObjectStore,
        )
        .unwrap();

        let public: Vec<_> = opts.public_entries().map(|(k, _)| k).collect();
        assert_eq!(public, vec!["allow_http", "endpoint", "region"]);
        assert_eq!(opts.iter().count(), 6);
    }

    #[test]
    fn test_invalid_boolean_is_rejected() {
        let err = StorageOptions::normalize(&raw(&[("anon", "maybe")]), FilesystemKind::ObjectStore)
            .unwrap_err();
        assert!(matches!(err, MultidimError::InvalidParameter { .. }));
    }

    #[test]
    fn test_s3_requires_bucket() {
        let opts = StorageOptions::normalize(&raw(&[]), FilesystemKind::ObjectStore).unwrap();
        let err = build_filesystem(FilesystemKind::ObjectStore, "s3", "", &opts)
            .err()
            .expect("empty bucket should fail");
        assert!(matches!(err, MultidimError::InvalidIdentifier(_)));
    }
}
