//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Broker reachability as seen by this process.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BrokerHealth {
    /// Adapter name (`"redis"`, `"memory"`).
    pub kind: String,
    /// `"ok"` or `"unavailable"`.
    pub status: String,
}

impl BrokerHealth {
    /// Health from a ping result.
    pub fn from_ping(kind: &str, reachable: bool) -> Self {
        Self {
            kind: kind.to_owned(),
            status: if reachable { "ok" } else { "unavailable" }.to_owned(),
        }
    }
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` when the broker answers, `"degraded"` otherwise.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Sessions whose push connection this process holds.
    pub local_sessions: usize,
    /// Broker state.
    pub broker: BrokerHealth,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, local_sessions: usize, broker: BrokerHealth) -> HealthResponse {
    let status = if broker.status == "ok" { "ok" } else { "degraded" };
    HealthResponse {
        status: status.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        local_sessions,
        broker,
    }
}
