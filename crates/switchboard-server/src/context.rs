//! Per-call relay context.

use axum::http::HeaderMap;
use switchboard_core::CorrelationId;
use tokio::time::Instant;

/// Header carrying a caller-supplied correlation ID; echoed on responses.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Context threaded through one inbound call or push connection.
#[derive(Clone, Debug)]
pub struct RelayContext {
    /// Correlation ID attached to every log line of this call.
    pub correlation_id: CorrelationId,
    /// When the call arrived.
    pub received_at: Instant,
}

impl RelayContext {
    /// Fresh context with a generated correlation ID.
    pub fn new() -> Self {
        Self::with_correlation_id(CorrelationId::new())
    }

    /// Context with a known correlation ID.
    pub fn with_correlation_id(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            received_at: Instant::now(),
        }
    }

    /// Reuse the caller's `x-correlation-id` when it is printable and short,
    /// otherwise generate one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let supplied = headers
            .get(CORRELATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty() && v.len() <= 128);
        match supplied {
            Some(id) => Self::with_correlation_id(CorrelationId::from(id)),
            None => Self::new(),
        }
    }

    /// Time since the call arrived.
    pub fn elapsed(&self) -> std::time::Duration {
        self.received_at.elapsed()
    }
}

impl Default for RelayContext {
    fn default() -> Self {
        Self::new()
    }
}
