//! Protocol handler seam.
//!
//! The relay knows nothing about the protocol spoken over a session. It
//! hands every call, native or replayed, to a [`ProtocolHandler`] together
//! with a [`SessionHandle`] for pushing events down the session's stream.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use switchboard_core::SessionId;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure reported by a protocol handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The call itself was malformed.
    #[error("invalid request: {0}")]
    BadRequest(String),
    /// The handler failed while processing a well-formed call.
    #[error("handler failed: {0}")]
    Internal(String),
}

impl HandlerError {
    /// HTTP status for the error response.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// Machine-readable code for the error response.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_REQUEST",
            Self::Internal(_) => "HANDLER_ERROR",
        }
    }
}

/// Result of one handler invocation.
pub type HandlerResult = Result<Response<Body>, HandlerError>;

/// Local protocol handler invoked by the connection owner.
#[async_trait]
pub trait ProtocolHandler: Send + Sync + 'static {
    /// Handle one call on `session`.
    async fn handle(&self, session: SessionHandle, request: Request<Body>) -> HandlerResult;

    /// Whether calls for one session must run one at a time, in arrival order.
    fn requires_serialized_access(&self) -> bool {
        false
    }
}

/// One event pushed down a session's stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEvent {
    /// SSE event name; `None` sends an unnamed `message` event.
    pub event: Option<String>,
    /// Event payload.
    pub data: String,
}

impl SessionEvent {
    /// Named event.
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Unnamed `message` event.
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }
}

/// Handle to the session a call belongs to.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: SessionId,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, events: mpsc::Sender<SessionEvent>) -> Self {
        Self { id, events }
    }

    /// Session token.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Queue an event on the session's stream. Returns `false` when the
    /// stream is gone or its buffer is full.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.events.try_send(event).is_ok()
    }

    /// Whether the session's stream is still open.
    pub fn is_open(&self) -> bool {
        !self.events.is_closed()
    }
}

/// Shared handler reference.
pub type SharedHandler = Arc<dyn ProtocolHandler>;
