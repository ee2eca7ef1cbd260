//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"shutting_down"` once shutdown began.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Lobbies currently open.
    pub lobbies: usize,
    /// Connections currently registered across all lobbies.
    pub connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, shutting_down: bool, lobbies: usize, connections: usize) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        lobbies,
        connections,
    }
}
