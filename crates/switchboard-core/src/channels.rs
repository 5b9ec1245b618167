//! Broker channel and key names.
//!
//! These strings are shared with every other process talking to the same
//! broker, so they are bit-exact:
//!
//! | Purpose | Name |
//! |---|---|
//! | Inbound requests for a session | `requests:<sessionId>` |
//! | Response for one exchange | `responses:<sessionId>:<requestId>` |
//! | Session registry record | `mcp:session:<sessionId>` |
//! | Subscriber liveness counter | `mcp:subscribers:<sessionId>` |

use std::time::Duration;

use crate::ids::{RequestId, SessionId};

/// Prefix of the per-session request channel.
pub const REQUEST_CHANNEL_PREFIX: &str = "requests:";
/// Prefix of the per-exchange response channel.
pub const RESPONSE_CHANNEL_PREFIX: &str = "responses:";
/// Prefix of the session registry key.
pub const SESSION_KEY_PREFIX: &str = "mcp:session:";
/// Prefix of the subscriber liveness counter key.
pub const SUBSCRIBERS_KEY_PREFIX: &str = "mcp:subscribers:";

/// Registry record expiry.
pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Channel carrying inbound requests for `session_id`.
#[must_use]
pub fn request_channel(session_id: &SessionId) -> String {
    format!("{REQUEST_CHANNEL_PREFIX}{session_id}")
}

/// Channel carrying the response to one exchange.
#[must_use]
pub fn response_channel(session_id: &SessionId, request_id: &RequestId) -> String {
    format!("{RESPONSE_CHANNEL_PREFIX}{session_id}:{request_id}")
}

/// Registry key for a session record.
#[must_use]
pub fn session_key(session_id: &SessionId) -> String {
    format!("{SESSION_KEY_PREFIX}{session_id}")
}

/// Liveness counter key for a session.
#[must_use]
pub fn subscribers_key(session_id: &SessionId) -> String {
    format!("{SUBSCRIBERS_KEY_PREFIX}{session_id}")
}
