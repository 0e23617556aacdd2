//! Shared cache, registration, and dispatch settings.

use serde::{Deserialize, Serialize};

/// Backend used for the shared session cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local store. Only useful for a single node or tests.
    #[default]
    Memory,
    /// Redis server shared by every node in the cluster.
    Redis,
}

/// Shared session cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Which backend to use.
    pub backend: CacheBackend,
    /// Redis connection URL, used when `backend` is `redis`.
    pub redis_url: String,
    /// Prefix for every key written by this gateway.
    pub key_prefix: String,
    /// Expiry of session entries, in seconds.
    pub entry_ttl_secs: u64,
    /// Interval at which live sessions are re-published, in seconds.
    pub reconcile_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "conduit:websocket".to_string(),
            entry_ttl_secs: 300,
            reconcile_interval_secs: 60,
        }
    }
}

/// Directory registration settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationSettings {
    /// Bounded wait for the per-kind registration lock, in milliseconds.
    pub lock_timeout_ms: u64,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 10_000,
        }
    }
}

/// Frame dispatch settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Text frame that is discarded without dispatch.
    pub heartbeat: String,
    /// Upper bound on one processor invocation, in milliseconds.
    pub processor_timeout_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            heartbeat: "heartbeat".to_string(),
            processor_timeout_ms: 30_000,
        }
    }
}
