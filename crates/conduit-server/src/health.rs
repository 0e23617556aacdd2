//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Id of this node.
    pub broker_id: String,
    /// Open WebSocket connections, registered or not.
    pub connections: usize,
    /// Registered end-user sessions.
    pub user_sessions: usize,
    /// Registered group sessions.
    pub group_sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    broker_id: &str,
    connections: usize,
    user_sessions: usize,
    group_sessions: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        broker_id: broker_id.to_owned(),
        connections,
        user_sessions,
        group_sessions,
    }
}
