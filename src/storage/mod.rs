//! Persistent media for the client.
//!
//! Two stores that never share a file:
//! - a key-value store holding the local mirror and the offline queue
//! - named response caches owned by the worker

mod kv;
mod responses;

pub use kv::{KeyValueStore, MemoryKvStore, SqliteKvStore};
pub use responses::{request_key, CacheEntry, CacheStorage, MemoryCacheStorage, SqliteCacheStorage};
