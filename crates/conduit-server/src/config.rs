//! Server configuration.

use std::time::Duration;

use conduit_settings::GatewaySettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration of a gateway server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Path of the WebSocket upgrade endpoint.
    pub ws_path: String,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between server-initiated pings, in seconds.
    pub ping_interval_secs: u64,
    /// Disconnect a client silent for longer than this, in seconds.
    pub pong_timeout_secs: u64,
    /// Outbound queue capacity per connection.
    pub send_queue_capacity: usize,
    /// Shared secret group connections must present, if any.
    pub secret_key: Option<String>,
    /// Text frame discarded as a keep-alive.
    pub heartbeat: String,
    /// Upper bound on one processor invocation, in milliseconds.
    pub processor_timeout_ms: u64,
    /// Bounded wait for a registration lock, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Interval between cache reconciliation passes, in seconds.
    pub reconcile_interval_secs: u64,
}

impl ServerConfig {
    /// Derive the server configuration from validated settings.
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            ws_path: settings.server.ws_path.clone(),
            max_message_size: settings.server.max_message_size,
            ping_interval_secs: settings.server.ping_interval_secs,
            pong_timeout_secs: settings.server.pong_timeout_secs,
            send_queue_capacity: settings.server.send_queue_capacity,
            secret_key: settings.security.secret_key.clone(),
            heartbeat: settings.dispatch.heartbeat.clone(),
            processor_timeout_ms: settings.dispatch.processor_timeout_ms,
            lock_timeout_ms: settings.registration.lock_timeout_ms,
            reconcile_interval_secs: settings.cache.reconcile_interval_secs,
        }
    }

    /// Ping interval as a [`Duration`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Pong timeout as a [`Duration`].
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Processor timeout as a [`Duration`].
    pub fn processor_timeout(&self) -> Duration {
        Duration::from_millis(self.processor_timeout_ms)
    }

    /// Lock timeout as a [`Duration`].
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Reconciliation interval as a [`Duration`].
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_path: "/websocket".into(),
            max_message_size: 1024 * 1024,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            send_queue_capacity: 256,
            secret_key: None,
            heartbeat: "heartbeat".into(),
            processor_timeout_ms: 30_000,
            lock_timeout_ms: 10_000,
            reconcile_interval_secs: 60,
        }
    }
}
