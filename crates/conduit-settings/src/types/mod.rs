//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so partial JSON files deserialize with defaults for the missing fields.

mod cluster;
mod server;

pub use cluster::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type for a gateway node.
///
/// ```json
/// {
///   "node": { "brokerId": "node-A" },
///   "server": { "port": 9000 },
///   "cache": { "backend": "redis", "redisUrl": "redis://cache:6379/3" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Node identity.
    pub node: NodeSettings,
    /// Listener and WebSocket transport settings.
    pub server: ServerSettings,
    /// Identity service settings.
    pub auth: AuthSettings,
    /// Handshake security settings.
    pub security: SecuritySettings,
    /// Shared session cache settings.
    pub cache: CacheSettings,
    /// Directory registration settings.
    pub registration: RegistrationSettings,
    /// Frame dispatch settings.
    pub dispatch: DispatchSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl GatewaySettings {
    /// Correct values that would break runtime invariants.
    ///
    /// Each correction is logged at `warn`. Returns the number of fields that
    /// were changed.
    pub fn validate(&mut self) -> usize {
        let mut fixed = 0;

        if !self.server.ws_path.starts_with('/') || self.server.ws_path.len() < 2 {
            let corrected = format!("/{}", self.server.ws_path.trim_start_matches('/'));
            let corrected = if corrected == "/" {
                "/websocket".to_string()
            } else {
                corrected
            };
            tracing::warn!(ws_path = %self.server.ws_path, %corrected, "server.wsPath must be an absolute path");
            self.server.ws_path = corrected;
            fixed += 1;
        }
        if self.server.ping_interval_secs == 0 {
            tracing::warn!("server.pingIntervalSecs is 0, using 30");
            self.server.ping_interval_secs = 30;
            fixed += 1;
        }
        if self.server.pong_timeout_secs <= self.server.ping_interval_secs {
            let corrected = self.server.ping_interval_secs * 2;
            tracing::warn!(
                pong_timeout = self.server.pong_timeout_secs,
                corrected,
                "server.pongTimeoutSecs must exceed the ping interval"
            );
            self.server.pong_timeout_secs = corrected;
            fixed += 1;
        }
        if self.auth.request_timeout_ms == 0 {
            tracing::warn!("auth.requestTimeoutMs is 0, using 5000");
            self.auth.request_timeout_ms = 5_000;
            fixed += 1;
        }
        if self.registration.lock_timeout_ms == 0 {
            tracing::warn!("registration.lockTimeoutMs is 0, using 10000");
            self.registration.lock_timeout_ms = 10_000;
            fixed += 1;
        }
        if self.dispatch.processor_timeout_ms == 0 {
            tracing::warn!("dispatch.processorTimeoutMs is 0, using 30000");
            self.dispatch.processor_timeout_ms = 30_000;
            fixed += 1;
        }
        if self.cache.reconcile_interval_secs == 0 {
            tracing::warn!("cache.reconcileIntervalSecs is 0, using 60");
            self.cache.reconcile_interval_secs = 60;
            fixed += 1;
        }
        if self.cache.entry_ttl_secs <= self.cache.reconcile_interval_secs {
            let corrected = self.cache.reconcile_interval_secs * 3;
            tracing::warn!(
                ttl = self.cache.entry_ttl_secs,
                corrected,
                "cache.entryTtlSecs must exceed the reconciliation interval"
            );
            self.cache.entry_ttl_secs = corrected;
            fixed += 1;
        }
        if self
            .security
            .secret_key
            .as_deref()
            .is_some_and(str::is_empty)
        {
            tracing::warn!("security.secretKey is empty, disabling the handshake check");
            self.security.secret_key = None;
            fixed += 1;
        }

        fixed
    }
}

/// Node identity settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeSettings {
    /// Broker id of this node. Generated per process when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<String>,
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter; `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
