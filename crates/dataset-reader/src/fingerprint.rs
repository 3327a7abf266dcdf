//! Stable fingerprints for cacheable dataset views.

use sha2::{Digest, Sha256};
use std::fmt;

use storage::{FilesystemKind, StorageOptions};

use crate::types::DatasetIdentifier;
use multidim_common::MultidimResult;

/// SHA-256 identity of one logical dataset view, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an identifier without touching storage.
    ///
    /// Covers the normalized URI, group, multiscale flag and level, engine
    /// override, `decode_times` and the non-credential storage options.
    ///
    /// Credentials are left out, so rotating a key keeps the cached entry.
    /// The flip side: metadata cached for a caller whose credentials could
    /// read the dataset is served to any caller naming the same URI and
    /// options, credentials or not. Only the data reads (`histogram`)
    /// open the store with the caller's own credentials. Deployments that
    /// mix tenants on one cache should keep per-tenant URIs or caches.
    pub fn of(id: &DatasetIdentifier) -> MultidimResult<Self> {
        let uri = normalize_uri(id.uri());
        let scheme = uri.split_once("://").map(|(s, _)| s);
        let kind = FilesystemKind::from_scheme(scheme)?;
        let options = StorageOptions::normalize(id.storage_options(), kind)?;

        let mut fields: Vec<(&str, String)> = vec![
            ("uri", uri.clone()),
            ("group", id.group().unwrap_or("").to_string()),
            ("multiscale", id.multiscale().to_string()),
            ("multiscale_level", id.multiscale_level().unwrap_or("").to_string()),
            ("engine", id.engine().map(|e| e.as_str()).unwrap_or("").to_string()),
            ("decode_times", id.decode_times().to_string()),
        ];
        for (key, value) in options.public_entries() {
            fields.push(("option", format!("{}={}", key, value)));
        }

        Ok(Self(stable_hash_hex(
            fields.iter().map(|(k, v)| (*k, v.as_str())),
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Backend key for this fingerprint under `prefix`.
    pub fn cache_key(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(hex: String) -> Self {
        Self(hex)
    }
}

/// Canonical form of a dataset URI for hashing.
///
/// The scheme is lowercased, `s3a` folds into `s3`, `file://` folds into a
/// plain path and trailing slashes are dropped.
pub fn normalize_uri(uri: &str) -> String {
    let uri = uri.trim();

    let normalized = match uri.split_once("://") {
        Some((scheme, rest)) => {
            let scheme = scheme.to_ascii_lowercase();
            match scheme.as_str() {
                "file" => rest.to_string(),
                "s3a" => format!("s3://{}", rest),
                _ => format!("{}://{}", scheme, rest),
            }
        }
        None => uri.to_string(),
    };

    let trimmed = normalized.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.ends_with(':') {
        normalized
    } else {
        trimmed.to_string()
    }
}

/// Hash length-prefixed key/value pairs so no two field lists collide.
pub fn stable_hash_hex<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut hasher = Sha256::new();
    for (key, value) in fields {
        hasher.update((key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
