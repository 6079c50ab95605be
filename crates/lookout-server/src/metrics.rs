//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle that renders the `/metrics` endpoint. Fails if a
/// recorder is already installed in this process.
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

/// WebSocket connections opened total (counter, labels: role).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Connections refused at admission (counter, labels: code).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Outbound frames dropped on a full or closed queue (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Inbound frames that failed to decode (counter, labels: reason).
pub const WS_INVALID_MESSAGES_TOTAL: &str = "ws_invalid_messages_total";
/// Published broadcasters (gauge).
pub const DIRECTORY_BROADCASTERS: &str = "directory_broadcasters";
/// Negotiation frames relayed (counter, labels: kind).
pub const SIGNAL_RELAYED_TOTAL: &str = "signal_relayed_total";
/// Telemetry frames delivered to viewers (counter).
pub const TELEMETRY_DELIVERED_TOTAL: &str = "telemetry_delivered_total";
/// Watch links cleared because permission was withdrawn (counter).
pub const TELEMETRY_REVOKED_TOTAL: &str = "telemetry_revoked_total";
/// Telemetry persistence failures (counter).
pub const TELEMETRY_PERSIST_ERRORS_TOTAL: &str = "telemetry_persist_errors_total";
/// Authorization decisions (counter, labels: outcome).
pub const AUTHZ_DECISIONS_TOTAL: &str = "authz_decisions_total";
/// Peers evicted by the liveness monitor (counter, labels: reason).
pub const LIVENESS_REAPED_TOTAL: &str = "liveness_reaped_total";
