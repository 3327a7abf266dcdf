//! Storage abstractions for the multidim crates.
//!
//! Provides unified interfaces for:
//! - Object storage (local, S3-compatible, HTTP, in-memory) for dataset bytes
//! - Redis or an in-process LRU as the metadata cache backend

pub mod backend;
pub mod cache;
pub mod memory_cache;
pub mod object_store;

pub use self::object_store::{build_filesystem, is_credential, FilesystemKind, StorageOptions};
pub use backend::CacheBackend;
pub use cache::RedisCache;
pub use memory_cache::{MemoryCache, MemoryCacheStats};
