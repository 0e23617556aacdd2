//! Shared cache error types.

use conduit_core::FailureKind;

/// Errors raised by a [`CacheStore`](crate::store::CacheStore) or the typed
/// [`SessionCache`](crate::cache::SessionCache) on top of it.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The Redis backend failed.
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// A cached value could not be encoded or decoded.
    #[error("cache value encoding: {0}")]
    Json(#[from] serde_json::Error),

    /// A key holds a value of a different shape than the operation expects.
    #[error("key {0} holds a value of the wrong type")]
    WrongType(String),

    /// The backend is unavailable.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

impl CacheError {
    /// Failure category; a cache failure during registration rejects the
    /// connection.
    pub fn kind(&self) -> FailureKind {
        FailureKind::Registration
    }
}
