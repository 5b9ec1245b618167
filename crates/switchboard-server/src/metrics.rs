//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

pub use switchboard_broker::BROKER_RECONNECTS_TOTAL;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded; a second call
/// fails because a global recorder is already installed.
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

/// Inbound relay calls (counter, labels: outcome, path).
pub const RELAY_REQUESTS_TOTAL: &str = "relay_requests_total";
/// Inbound relay call duration seconds (histogram, labels: path).
pub const RELAY_REQUEST_DURATION_SECONDS: &str = "relay_request_duration_seconds";
/// Sessions owned by this process (gauge).
pub const SESSIONS_ACTIVE: &str = "relay_sessions_active";
/// Push connections opened (counter).
pub const SSE_CONNECTIONS_TOTAL: &str = "sse_connections_total";
/// Requests executed by connection owners (counter, labels: outcome).
pub const OWNER_EXCHANGES_TOTAL: &str = "owner_exchanges_total";
