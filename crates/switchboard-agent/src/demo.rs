//! Built-in protocol handler served by the binary.
//!
//! Calls are JSON objects with an `op` field:
//!
//! - `ping` answers `pong`
//! - `echo` answers with the call's `payload` as JSON
//! - `notify` pushes `payload` down the session's event stream and answers 202

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use serde_json::Value;
use switchboard_server::{HandlerError, HandlerResult, ProtocolHandler, SessionEvent, SessionHandle};
use tracing::debug;

/// Largest call body the demo handler reads.
const MAX_CALL_BYTES: usize = 1024 * 1024;

/// Minimal ping/echo/notify protocol.
pub struct DemoHandler;

fn build(status: StatusCode, content_type: &str, body: impl Into<Body>) -> HandlerResult {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .map_err(|e| HandlerError::Internal(e.to_string()))
}

#[async_trait]
impl ProtocolHandler for DemoHandler {
    async fn handle(&self, session: SessionHandle, request: Request<Body>) -> HandlerResult {
        let body = axum::body::to_bytes(request.into_body(), MAX_CALL_BYTES)
            .await
            .map_err(|e| HandlerError::BadRequest(format!("unreadable body: {e}")))?;
        let call: Value = serde_json::from_slice(&body)
            .map_err(|e| HandlerError::BadRequest(format!("call is not JSON: {e}")))?;
        let op = call
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::BadRequest("missing op".into()))?;
        debug!(session_id = %session.id(), op, "demo call");

        let payload = call.get("payload").cloned().unwrap_or(Value::Null);
        match op {
            "ping" => build(StatusCode::OK, "text/plain", "pong"),
            "echo" => build(StatusCode::OK, "application/json", payload.to_string()),
            "notify" => {
                if !session.send(SessionEvent::message(payload.to_string())) {
                    return Err(HandlerError::Internal("session stream is closed or full".into()));
                }
                build(StatusCode::ACCEPTED, "text/plain", "")
            }
            other => Err(HandlerError::BadRequest(format!("unknown op {other:?}"))),
        }
    }
}
