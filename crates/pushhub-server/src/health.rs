//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use crate::bridge::BridgeState;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the bridge is subscribed, `"degraded"` otherwise.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered connections in this process.
    pub connections: usize,
    /// Clients with at least one connection in this process.
    pub clients: usize,
    /// Backplane bridge state.
    pub bridge: BridgeState,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    clients: usize,
    bridge: BridgeState,
) -> HealthResponse {
    let status = if bridge == BridgeState::Subscribed {
        "ok"
    } else {
        "degraded"
    };
    HealthResponse {
        status: status.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        clients,
        bridge,
    }
}
