//! Relay error taxonomy.
//!
//! Every failure an inbound call can hit maps to exactly one variant, and
//! every variant maps to an HTTP status and a machine-readable code:
//!
//! | Variant | Status | Code |
//! |---|---|---|
//! | [`RelayError::MissingSessionId`] | 400 | `VALIDATION_ERROR` |
//! | [`RelayError::UnknownSession`] | 400 | `VALIDATION_ERROR` |
//! | [`RelayError::UnreachableSession`] | 503 | `SESSION_UNREACHABLE` |
//! | [`RelayError::ResponseTimeout`] | 408 | `RESPONSE_TIMEOUT` |
//! | [`RelayError::Broker`] | 500 | `BROKER_ERROR` |
//! | [`RelayError::BodyRead`] | 400 | `INVALID_BODY` |
//! | [`RelayError::Codec`] | 500 | `CODEC_ERROR` |
//! | [`RelayError::Replay`] | 500 | `REPLAY_ERROR` |

use std::time::Duration;

use thiserror::Error;

use crate::ids::{RequestId, SessionId};

/// Result alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Failure of one relayed call.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No `sessionId` query parameter, or one that cannot name a channel.
    #[error("missing or malformed sessionId")]
    MissingSessionId,

    /// The registry has no record of the session (never created or expired).
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// The session is registered but no owner is subscribed to it.
    #[error("session {0} has no reachable owner; reconnect required")]
    UnreachableSession(SessionId),

    /// An owner is subscribed but produced no response in time.
    #[error("no response for request {request_id} on session {session_id} within {after:?}")]
    ResponseTimeout {
        /// Target session.
        session_id: SessionId,
        /// Exchange that timed out.
        request_id: RequestId,
        /// The bound that elapsed.
        after: Duration,
    },

    /// Broker failure that survived the internal retry.
    #[error("broker error: {0}")]
    Broker(String),

    /// The inbound body could not be read.
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// A wire record could not be encoded or decoded.
    #[error("wire codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A serialized request could not be rebuilt into a handler request.
    #[error("request replay failed: {0}")]
    Replay(String),
}

impl RelayError {
    /// HTTP status surfaced to the caller.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingSessionId | Self::UnknownSession(_) | Self::BodyRead(_) => 400,
            Self::UnreachableSession(_) => 503,
            Self::ResponseTimeout { .. } => 408,
            Self::Broker(_) | Self::Codec(_) | Self::Replay(_) => 500,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSessionId | Self::UnknownSession(_) => "VALIDATION_ERROR",
            Self::UnreachableSession(_) => "SESSION_UNREACHABLE",
            Self::ResponseTimeout { .. } => "RESPONSE_TIMEOUT",
            Self::Broker(_) => "BROKER_ERROR",
            Self::BodyRead(_) => "INVALID_BODY",
            Self::Codec(_) => "CODEC_ERROR",
            Self::Replay(_) => "REPLAY_ERROR",
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::MissingSessionId | Self::UnknownSession(_) | Self::BodyRead(_) => "rejected",
            Self::UnreachableSession(_) => "unreachable",
            Self::ResponseTimeout { .. } => "timeout",
            Self::Broker(_) | Self::Codec(_) | Self::Replay(_) => "error",
        }
    }

    /// JSON error body: `{ "error": { "code", "message" } }`.
    #[must_use]
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}
