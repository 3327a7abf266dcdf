//! Configuration for dataset access and metadata caching.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// How consolidated metadata is treated when opening Zarr stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidatedMode {
    /// Use consolidated metadata when present, else inspect node by node.
    #[default]
    Auto,
    /// Always inspect node by node.
    Ignore,
}

impl ConsolidatedMode {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "ignore" | "false" | "off" => Self::Ignore,
            _ => Self::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Ignore => "ignore",
        }
    }
}

/// How virtual chunks under one URL prefix of an Icechunk repository are read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkAccess {
    /// Unsigned requests.
    pub anonymous: bool,
    /// Credentials from the process environment.
    pub from_env: bool,
}

/// Parse `{"s3://bucket/prefix/": {"anonymous": true}, ...}`.
pub fn parse_chunk_access(raw: &str) -> Result<BTreeMap<String, ChunkAccess>, String> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(raw).map_err(|e| format!("invalid authorized_chunk_access: {}", e))
}

/// Configuration for the dataset reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Cache metadata at all. When false every request recomputes.
    pub cache_enabled: bool,

    /// `redis://` URL of the shared cache; in-process LRU when unset.
    pub cache_url: Option<String>,

    /// Lifetime of a cached metadata entry in seconds.
    pub cache_ttl_secs: u64,

    /// Prefix of every cache key.
    pub cache_key_prefix: String,

    /// Entry capacity of the in-process backend.
    pub memory_cache_capacity: usize,

    /// Bound on each cache backend command in milliseconds.
    pub cache_op_timeout_ms: u64,

    /// Bound on resolving and opening one dataset in seconds.
    pub open_timeout_secs: u64,

    /// Consecutive backend failures before the breaker opens.
    pub breaker_failure_threshold: u32,

    /// Seconds the breaker stays open before a trial request is allowed.
    pub breaker_cooldown_secs: u64,

    pub consolidated: ConsolidatedMode,

    /// Default histogram bucket count.
    pub histogram_bins: usize,

    /// Upper bound on values sampled per histogram.
    pub histogram_max_samples: usize,

    /// Virtual chunk containers Icechunk repositories may read, by URL prefix.
    /// Containers not listed here stay unauthorized.
    pub authorized_chunk_access: BTreeMap<String, ChunkAccess>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_url: None,
            cache_ttl_secs: 300,
            cache_key_prefix: "multidim:meta".to_string(),
            memory_cache_capacity: 512,
            cache_op_timeout_ms: 500,
            open_timeout_secs: 30,
            breaker_failure_threshold: 3,
            breaker_cooldown_secs: 30,
            consolidated: ConsolidatedMode::Auto,
            histogram_bins: 10,
            histogram_max_samples: 1_000_000,
            authorized_chunk_access: BTreeMap::new(),
        }
    }
}

impl ReaderConfig {
    /// Load configuration from `MULTIDIM_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MULTIDIM_CACHE_ENABLED") {
            config.cache_enabled = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("MULTIDIM_CACHE_URL") {
            let val = val.trim();
            config.cache_url = if val.is_empty() {
                None
            } else {
                Some(val.to_string())
            };
        }

        if let Ok(val) = std::env::var("MULTIDIM_CACHE_TTL_SECS") {
            if let Ok(secs) = val.parse() {
                config.cache_ttl_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("MULTIDIM_CACHE_KEY_PREFIX") {
            config.cache_key_prefix = val;
        }

        if let Ok(val) = std::env::var("MULTIDIM_MEMORY_CACHE_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                config.memory_cache_capacity = capacity;
            }
        }

        if let Ok(val) = std::env::var("MULTIDIM_CACHE_OP_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                config.cache_op_timeout_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("MULTIDIM_OPEN_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.open_timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("MULTIDIM_BREAKER_FAILURE_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.breaker_failure_threshold = n;
            }
        }

        if let Ok(val) = std::env::var("MULTIDIM_BREAKER_COOLDOWN_SECS") {
            if let Ok(secs) = val.parse() {
                config.breaker_cooldown_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("MULTIDIM_CONSOLIDATED") {
            config.consolidated = ConsolidatedMode::from_str(&val);
        }

        if let Ok(val) = std::env::var("MULTIDIM_HISTOGRAM_BINS") {
            if let Ok(bins) = val.parse() {
                config.histogram_bins = bins;
            }
        }

        if let Ok(val) = std::env::var("MULTIDIM_HISTOGRAM_MAX_SAMPLES") {
            if let Ok(n) = val.parse() {
                config.histogram_max_samples = n;
            }
        }

        if let Ok(val) = std::env::var("MULTIDIM_AUTHORIZED_CHUNK_ACCESS") {
            match parse_chunk_access(&val) {
                Ok(access) => config.authorized_chunk_access = access,
                Err(e) => warn!(error = %e, "Ignoring MULTIDIM_AUTHORIZED_CHUNK_ACCESS"),
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_ttl_secs == 0 {
            return Err("cache_ttl_secs must be > 0".to_string());
        }

        if self.cache_key_prefix.is_empty() {
            return Err("cache_key_prefix must not be empty".to_string());
        }

        if let Some(url) = &self.cache_url {
            if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
                return Err(format!("cache_url must be a redis:// URL, got '{}'", url));
            }
        }

        if self.open_timeout_secs == 0 {
            return Err("open_timeout_secs must be > 0".to_string());
        }

        if self.breaker_failure_threshold == 0 {
            return Err("breaker_failure_threshold must be > 0".to_string());
        }

        if self.histogram_bins == 0 {
            return Err("histogram_bins must be > 0".to_string());
        }

        if self.histogram_max_samples == 0 {
            return Err("histogram_max_samples must be > 0".to_string());
        }

        for (prefix, access) in &self.authorized_chunk_access {
            if !prefix.contains("://") {
                return Err(format!("authorized_chunk_access prefix '{}' is not a URL", prefix));
            }
            if access.anonymous && access.from_env {
                return Err(format!(
                    "authorized_chunk_access '{}' cannot be both anonymous and from_env",
                    prefix
                ));
            }
        }

        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_op_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_op_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}
