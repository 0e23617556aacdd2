//! Listener, identity service, and handshake security settings.

use serde::{Deserialize, Serialize};

/// Listener and WebSocket transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listener port.
    pub port: u16,
    /// Path of the WebSocket upgrade endpoint.
    pub ws_path: String,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Interval between server-initiated pings, in seconds.
    pub ping_interval_secs: u64,
    /// A client silent for longer than this is disconnected, in seconds.
    pub pong_timeout_secs: u64,
    /// Outbound queue capacity per connection.
    pub send_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8260,
            ws_path: "/websocket".to_string(),
            max_message_size: 1024 * 1024,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            send_queue_capacity: 256,
        }
    }
}

/// Identity service settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Endpoint that exchanges a bearer credential for a principal.
    pub oauth_url: String,
    /// Request timeout for the identity call, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            oauth_url: "http://127.0.0.1:8020/oauth/api/user".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

/// Handshake security settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecuritySettings {
    /// Shared secret expected from group connections. When unset, the
    /// handshake accepts any secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}
