//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if another recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names recorded across the workspace.

pub use lobby_hub::metrics::{
    CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL, HUB_EVICTIONS_TOTAL,
    HUB_PEERS, HUB_REPLACEMENTS_TOTAL, HUBS_ACTIVE,
};
pub use lobby_session::metrics::{IDENTITY_MISMATCH_TOTAL, MESSAGES_MALFORMED_TOTAL, MESSAGES_TOTAL};

/// Lobbies open (gauge).
pub const LOBBIES_OPEN: &str = "lobby_lobbies_open";
/// Joins refused because the lobby limit was reached (counter).
pub const LOBBY_LIMIT_REJECTIONS_TOTAL: &str = "lobby_lobby_limit_rejections_total";
/// HTTP requests served (counter, labels: status class).
pub const HTTP_REQUESTS_TOTAL: &str = "lobby_http_requests_total";
/// HTTP request latency in seconds (histogram).
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "lobby_http_request_duration_seconds";
