//! Icechunk repositories.
//!
//! A repository is opened read-only at the tip of `main` and its session is
//! handed to the Zarr reader through `zarrs_icechunk`. Repositories live on
//! local disk or S3; virtual chunks are only read from containers listed in
//! `authorized_chunk_access`.

use std::path::PathBuf;

use multidim_common::{MultidimError, MultidimResult};
use storage::FilesystemKind;

use crate::resolver::ResolvedAccess;

/// Branch whose tip is opened.
pub const DEFAULT_BRANCH: &str = "main";

/// Where an Icechunk repository lives.
#[derive(Debug, Clone, PartialEq)]
pub enum RepoLocation {
    Local(PathBuf),
    S3 {
        bucket: String,
        prefix: Option<String>,
        region: Option<String>,
        endpoint: Option<String>,
        anonymous: bool,
        allow_http: bool,
    },
}

impl RepoLocation {
    /// Repository location for a resolved dataset.
    ///
    /// HTTP and in-memory filesystems cannot hold a repository.
    pub fn of(access: &ResolvedAccess) -> MultidimResult<Self> {
        let root = access.root.as_ref().trim_matches('/');
        match access.filesystem {
            FilesystemKind::Local => Ok(Self::Local(PathBuf::from(format!("/{}", root)))),
            FilesystemKind::ObjectStore => {
                if access.authority.is_empty() {
                    return Err(MultidimError::InvalidIdentifier(
                        "object store URI has no bucket".to_string(),
                    ));
                }
                let options = &access.options;
                Ok(Self::S3 {
                    bucket: access.authority.clone(),
                    prefix: (!root.is_empty()).then(|| root.to_string()),
                    region: options.get("region").map(str::to_string),
                    endpoint: options.get("endpoint").map(str::to_string),
                    anonymous: options.flag("anonymous") || options.flag("skip_signature"),
                    allow_http: options.flag("allow_http"),
                })
            }
            other => Err(MultidimError::EngineUnavailable(format!(
                "icechunk over {} storage",
                other
            ))),
        }
    }
}

#[cfg(feature = "icechunk")]
pub use self::engine::IcechunkEngine;

#[cfg(feature = "icechunk")]
mod engine {
    use async_trait::async_trait;
    use ::icechunk::config::{Credentials, S3Credentials, S3Options, S3StaticCredentials};
    use ::icechunk::repository::VersionInfo;
    use ::icechunk::storage::{new_local_filesystem_storage, new_s3_storage, Storage};
    use ::icechunk::{Repository, RepositoryConfig};
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;
    use tracing::{debug, instrument};
    use zarrs::storage::AsyncReadableListableStorage;
    use zarrs_icechunk::AsyncIcechunkStore;

    use multidim_common::{MultidimError, MultidimResult};
    use storage::StorageOptions;

    use super::{RepoLocation, DEFAULT_BRANCH};
    use crate::config::{ChunkAccess, ConsolidatedMode};
    use crate::opener::{ArrayEngine, DatasetHandle, ZarrHandle};
    use crate::resolver::ResolvedAccess;
    use crate::types::{DatasetIdentifier, EngineKind};

    /// Opens Icechunk repositories, native or with virtual chunks.
    pub struct IcechunkEngine {
        consolidated: ConsolidatedMode,
        chunk_access: BTreeMap<String, ChunkAccess>,
    }

    impl IcechunkEngine {
        pub fn new(consolidated: ConsolidatedMode, chunk_access: BTreeMap<String, ChunkAccess>) -> Self {
            Self {
                consolidated,
                chunk_access,
            }
        }

        fn virtual_credentials(&self) -> HashMap<String, Credentials> {
            self.chunk_access
                .iter()
                .map(|(prefix, access)| {
                    let credentials = if access.anonymous {
                        S3Credentials::Anonymous
                    } else {
                        S3Credentials::FromEnv
                    };
                    (prefix.clone(), Credentials::S3(credentials))
                })
                .collect()
        }
    }

    #[async_trait]
    impl ArrayEngine for IcechunkEngine {
        fn kind(&self) -> EngineKind {
            EngineKind::Icechunk
        }

        #[instrument(skip(self, access, id), fields(uri = %id.uri()))]
        async fn open(
            &self,
            access: &ResolvedAccess,
            id: &DatasetIdentifier,
        ) -> MultidimResult<Arc<dyn DatasetHandle>> {
            let location = RepoLocation::of(access)?;
            let repo_storage = build_storage(&location, &access.options).await?;

            let repo = Repository::open(
                Some(RepositoryConfig::default()),
                repo_storage,
                self.virtual_credentials(),
            )
            .await
            .map_err(|e| MultidimError::UpstreamIo(format!("{}: {}", id.uri(), e)))?;

            let session = repo
                .readonly_session(&VersionInfo::BranchTipRef(DEFAULT_BRANCH.to_string()))
                .await
                .map_err(|e| MultidimError::UpstreamIo(format!("{}: {}", id.uri(), e)))?;
            debug!(branch = DEFAULT_BRANCH, "Opened Icechunk session");

            let store: AsyncReadableListableStorage = Arc::new(AsyncIcechunkStore::new(session));
            let handle =
                ZarrHandle::open_storage(store, "", id, self.consolidated, EngineKind::Icechunk).await?;
            Ok(Arc::new(handle))
        }
    }

    async fn build_storage(
        location: &RepoLocation,
        options: &StorageOptions,
    ) -> MultidimResult<Arc<dyn Storage + Send + Sync>> {
        let result = match location {
            RepoLocation::Local(path) => {
                if !path.exists() {
                    return Err(MultidimError::DatasetNotFound(path.display().to_string()));
                }
                new_local_filesystem_storage(path).await
            }
            RepoLocation::S3 {
                bucket,
                prefix,
                region,
                endpoint,
                anonymous,
                allow_http,
            } => {
                let config = S3Options {
                    region: region.clone(),
                    endpoint_url: endpoint.clone(),
                    anonymous: *anonymous,
                    allow_http: *allow_http,
                };
                new_s3_storage(config, bucket.clone(), prefix.clone(), Some(s3_credentials(options, *anonymous)))
            }
        };
        result.map_err(|e| MultidimError::UpstreamIo(format!("icechunk storage: {}", e)))
    }

    fn s3_credentials(options: &StorageOptions, anonymous: bool) -> S3Credentials {
        if anonymous {
            return S3Credentials::Anonymous;
        }
        match (options.get("access_key_id"), options.get("secret_access_key")) {
            (Some(key), Some(secret)) => S3Credentials::Static(S3StaticCredentials {
                access_key_id: key.to_string(),
                secret_access_key: secret.to_string(),
                session_token: options.get("session_token").map(str::to_string),
                expires_after: None,
            }),
            _ => S3Credentials::FromEnv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use std::collections::HashMap;
    use std::sync::Arc;
    use storage::StorageOptions;

    use crate::types::EngineKind;

    fn access(kind: FilesystemKind, authority: &str, root: &str, options: &[(&str, &str)]) -> ResolvedAccess {
        let raw: HashMap<String, String> = options
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ResolvedAccess {
            filesystem: kind,
            authority: authority.to_string(),
            engine: EngineKind::Icechunk,
            options: StorageOptions::normalize(&raw, kind).unwrap(),
            store: Arc::new(InMemory::new()),
            root: Path::from(root),
        }
    }

    #[test]
    fn test_local_repository_path_is_absolute() {
        let location = RepoLocation::of(&access(FilesystemKind::Local, "", "data/repo.icechunk", &[])).unwrap();
        assert_eq!(location, RepoLocation::Local(PathBuf::from("/data/repo.icechunk")));
    }

    #[test]
    fn test_s3_repository_carries_bucket_and_options() {
        let location = RepoLocation::of(&access(
            FilesystemKind::ObjectStore,
            "bucket",
            "test_icechunk",
            &[("endpoint_url", "http://localhost:9000"), ("region", "us-west-2"), ("anon", "yes")],
        ))
        .unwrap();

        assert_eq!(
            location,
            RepoLocation::S3 {
                bucket: "bucket".to_string(),
                prefix: Some("test_icechunk".to_string()),
                region: Some("us-west-2".to_string()),
                endpoint: Some("http://localhost:9000".to_string()),
                anonymous: true,
                allow_http: true,
            }
        );

        let at_bucket_root = RepoLocation::of(&access(FilesystemKind::ObjectStore, "bucket", "", &[])).unwrap();
        assert!(matches!(at_bucket_root, RepoLocation::S3 { prefix: None, anonymous: false, .. }));
    }

    #[test]
    fn test_unsupported_filesystems() {
        let err = RepoLocation::of(&access(FilesystemKind::Http, "example.com", "repo", &[])).unwrap_err();
        assert!(matches!(err, MultidimError::EngineUnavailable(_)));

        let err = RepoLocation::of(&access(FilesystemKind::Memory, "", "repo", &[])).unwrap_err();
        assert!(matches!(err, MultidimError::EngineUnavailable(_)));

        let err = RepoLocation::of(&access(FilesystemKind::ObjectStore, "", "repo", &[])).unwrap_err();
        assert!(matches!(err, MultidimError::InvalidIdentifier(_)));
    }
}
