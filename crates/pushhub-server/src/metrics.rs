//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before anything is recorded.
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

/// Connections registered (counter).
pub const CONNECTIONS_TOTAL: &str = "pushhub_connections_total";
/// Connections unregistered (counter).
pub const DISCONNECTIONS_TOTAL: &str = "pushhub_disconnections_total";
/// Registered connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "pushhub_connections_active";
/// Clients with at least one connection (gauge).
pub const CLIENTS_ACTIVE: &str = "pushhub_clients_active";
/// Connection lifetime in seconds (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "pushhub_connection_duration_seconds";
/// Payloads accepted into a mailbox (counter).
pub const MESSAGES_DELIVERED_TOTAL: &str = "pushhub_messages_delivered_total";
/// Payloads dropped at a full mailbox (counter).
pub const MESSAGES_DROPPED_TOTAL: &str = "pushhub_messages_dropped_total";
/// Publishes handed to the backplane (counter).
pub const PUBLISH_TOTAL: &str = "pushhub_publish_total";
/// Failed publishes (counter, labels: kind).
pub const PUBLISH_ERRORS_TOTAL: &str = "pushhub_publish_errors_total";
/// Backplane messages that failed to decode (counter).
pub const ENVELOPES_MALFORMED_TOTAL: &str = "pushhub_envelopes_malformed_total";
/// Bridge resubscribe attempts (counter).
pub const BRIDGE_RECONNECTS_TOTAL: &str = "pushhub_bridge_reconnects_total";
/// 1 while the bridge holds a live subscription, else 0 (gauge).
pub const BRIDGE_SUBSCRIBED: &str = "pushhub_bridge_subscribed";
