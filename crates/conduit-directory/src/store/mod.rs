//! Key/value backends for the shared session cache.
//!
//! The cache only needs plain string keys and string hashes, each with an
//! expiry. Writes are upserts: writing the same field twice leaves one value,
//! the last one written.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::CacheError;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// A cluster-wide key/value store with TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Upsert `field` in the hash at `key` and reset the key's expiry.
    async fn hash_put(&self, key: &str, field: &str, value: String, ttl: Duration) -> Result<()>;

    /// Read one field of a hash.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Read every field of a hash. A missing key yields an empty list.
    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>>;

    /// Delete one field of a hash. Returns whether it existed.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool>;

    /// Delete one field of a hash only if it still holds `expected`.
    ///
    /// The compare and the delete are atomic, so a concurrent upsert of the
    /// same field always survives.
    async fn hash_delete_if(&self, key: &str, field: &str, expected: &str) -> Result<bool>;

    /// Upsert a string key with an expiry.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Read a string key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete a key of any type. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Drop keys whose expiry has passed. Returns how many were removed.
    ///
    /// Backends that expire keys on their own have nothing to do.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}
