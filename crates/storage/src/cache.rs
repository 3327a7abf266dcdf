//! Redis-backed key-value cache for dataset metadata.

use async_trait::async_trait;
use bytes::Bytes;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use multidim_common::{MultidimError, MultidimResult};

use crate::backend::CacheBackend;

/// Redis cache client.
///
/// The connection is established lazily on first use and dropped after any
/// failed command, so a Redis restart is picked up by the next request
/// without restarting the service. Every command is bounded by `op_timeout`.
pub struct RedisCache {
    client: Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    op_timeout: Duration,
}

impl RedisCache {
    /// Create a client for `redis_url`. No connection is made yet.
    pub fn new(redis_url: &str, op_timeout: Duration) -> MultidimResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| MultidimError::CacheUnavailable(format!("Invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            conn: Mutex::new(None),
            op_timeout,
        })
    }

    async fn connection(&self) -> MultidimResult<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = tokio::time::timeout(
            self.op_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| MultidimError::CacheUnavailable("Redis connect timed out".to_string()))?
        .map_err(|e| MultidimError::CacheUnavailable(format!("Redis connection failed: {}", e)))?;

        debug!("Connected to Redis");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self) {
        *self.conn.lock().await = None;
    }

    /// Run one command with the timeout applied, dropping the connection on failure.
    async fn run<T, F, Fut>(&self, op: &str, f: F) -> MultidimResult<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;

        let result = match tokio::time::timeout(self.op_timeout, f(conn)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => MultidimError::CacheUnavailable(format!("Cache {} failed: {}", op, e)),
            Err(_) => MultidimError::CacheUnavailable(format!(
                "Cache {} timed out after {}ms",
                op,
                self.op_timeout.as_millis()
            )),
        };

        warn!(error = %result, "Dropping Redis connection");
        self.reset().await;
        Err(result)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> MultidimResult<Option<Bytes>> {
        let result: Option<Vec<u8>> = self
            .run("get", |mut conn| async move { conn.get(key).await })
            .await?;

        Ok(result.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> MultidimResult<()> {
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        self.run("set", |mut conn| async move {
            let _: () = conn.pset_ex(key, value.as_ref(), ttl_ms).await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> MultidimResult<()> {
        self.run("delete", |mut conn| async move {
            let _: () = conn.del(key).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_cache_unavailable() {
        let err = RedisCache::new("not a url", Duration::from_millis(100))
            .err()
            .expect("invalid URL should fail");
        assert!(matches!(err, MultidimError::CacheUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_fast() {
        // Port 1 is never a Redis server; the op timeout bounds the attempt.
        let cache = RedisCache::new("redis://127.0.0.1:1", Duration::from_millis(200)).unwrap();

        let start = std::time::Instant::now();
        let err = cache.get("multidim:meta:missing").await.unwrap_err();
        assert!(matches!(err, MultidimError::CacheUnavailable(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
