//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Fails if a
/// global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Connections rejected before or during registration (counter, labels: reason).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "connections_rejected_total";
/// Successful registrations (counter, labels: kind).
pub const REGISTRATIONS_TOTAL: &str = "registrations_total";
/// Registrations abandoned on lock timeout (counter, labels: kind).
pub const REGISTRATION_TIMEOUTS_TOTAL: &str = "registration_timeouts_total";
/// Registered sessions on this node (gauge, labels: kind).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Inbound frames (counter, labels: kind).
pub const FRAMES_RECEIVED_TOTAL: &str = "frames_received_total";
/// Heartbeat frames discarded (counter).
pub const HEARTBEATS_TOTAL: &str = "heartbeats_total";
/// Per-processor dispatch failures (counter, labels: processor, kind).
pub const PROCESSOR_FAILURES_TOTAL: &str = "processor_failures_total";
/// Per-processor handling time (histogram, labels: processor).
pub const PROCESSOR_DURATION_SECONDS: &str = "processor_duration_seconds";
/// Reconciliation passes (counter, labels: outcome).
pub const RECONCILE_RUNS_TOTAL: &str = "reconcile_runs_total";
/// Stale cache fields pruned by reconciliation (counter).
pub const RECONCILE_PRUNED_TOTAL: &str = "reconcile_pruned_total";
/// Expired backend keys swept by reconciliation (counter).
pub const RECONCILE_SWEPT_TOTAL: &str = "reconcile_swept_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        // No global install, to avoid conflicts between tests.
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            CONNECTIONS_REJECTED_TOTAL,
            REGISTRATIONS_TOTAL,
            REGISTRATION_TIMEOUTS_TOTAL,
            SESSIONS_ACTIVE,
            FRAMES_RECEIVED_TOTAL,
            HEARTBEATS_TOTAL,
            PROCESSOR_FAILURES_TOTAL,
            PROCESSOR_DURATION_SECONDS,
            RECONCILE_RUNS_TOTAL,
            RECONCILE_PRUNED_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
