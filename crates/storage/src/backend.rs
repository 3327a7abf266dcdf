//! Key-value backend interface used by the metadata cache.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use multidim_common::MultidimResult;

/// A key-value store with per-entry expiry.
///
/// Every failure is reported as `MultidimError::CacheUnavailable`; callers
/// decide whether to degrade or propagate.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name used in logs and metrics ("redis", "memory").
    fn name(&self) -> &'static str;

    /// Fetch the value stored under `key`, `None` if absent or expired.
    async fn get(&self, key: &str) -> MultidimResult<Option<Bytes>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> MultidimResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> MultidimResult<()>;
}
