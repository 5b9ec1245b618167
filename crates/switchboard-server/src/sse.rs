//! `GET /sse`: the push connection.
//!
//! Opening the stream opens a session owned by this process. The first
//! event names the endpoint clients must POST to; protocol events pushed
//! through the session's [`SessionHandle`](crate::handler::SessionHandle)
//! follow. The stream ends itself at the configured maximum duration, on
//! shutdown, or when the client goes away; each path closes the owner.

use std::convert::Infallible;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName};
use axum::http::header::{HOST, USER_AGENT};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use switchboard_core::{RelayError, SessionMetadata};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::RelayContext;
use crate::handler::SessionEvent;
use crate::metrics::SSE_CONNECTIONS_TOTAL;
use crate::owner::{CloseReason, ConnectionOwner};
use crate::relay::Relay;

/// Events buffered per session before [`SessionHandle::send`](crate::handler::SessionHandle::send) starts refusing.
const EVENT_BUFFER: usize = 64;

/// Name of the first event on every stream.
pub const ENDPOINT_EVENT: &str = "endpoint";

/// URI clients POST calls to for `session_id`.
pub fn message_endpoint(session_id: &str) -> String {
    format!("/message?sessionId={session_id}")
}

enum Step {
    Push(SessionEvent),
    Close(CloseReason),
}

/// Closes the owner when the stream is dropped without closing it first.
struct CloseOnDrop {
    owner: Option<Arc<ConnectionOwner>>,
}

impl CloseOnDrop {
    async fn close(&mut self, reason: CloseReason) {
        if let Some(owner) = self.owner.take() {
            owner.close(reason).await;
        }
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let Some(owner) = self.owner.take() else {
            return;
        };
        debug!(session_id = %owner.session_id(), "push stream dropped");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let _ = runtime.spawn(async move { owner.close(CloseReason::ClientGone).await });
        }
    }
}

fn to_sse(event: SessionEvent) -> Event {
    match event.event {
        Some(name) => Event::default().event(name).data(event.data),
        None => Event::default().data(event.data),
    }
}

/// Open a session for the request carrying `headers` and return its stream.
pub async fn open_stream(
    relay: Arc<Relay>,
    shutdown: CancellationToken,
    headers: &HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>, RelayError> {
    let ctx = RelayContext::from_headers(headers);
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    let metadata = SessionMetadata {
        origin_host: header(HOST),
        client_id: header(USER_AGENT),
        correlation_id: ctx.correlation_id.clone(),
    };

    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let owner = relay.open_session(&ctx, metadata, tx).await?;
    metrics::counter!(SSE_CONNECTIONS_TOTAL).increment(1);

    let endpoint = message_endpoint(owner.session_id().as_str());
    let max_duration = relay.config().max_connection_duration;
    let keep_alive = relay.config().keep_alive;
    let mut guard = CloseOnDrop { owner: Some(owner) };

    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(Event::default().event(ENDPOINT_EVENT).data(endpoint));

        let deadline = tokio::time::sleep(max_duration);
        tokio::pin!(deadline);
        loop {
            let step = tokio::select! {
                () = &mut deadline => Step::Close(CloseReason::MaxDuration),
                () = shutdown.cancelled() => Step::Close(CloseReason::Shutdown),
                event = rx.recv() => match event {
                    Some(event) => Step::Push(event),
                    None => Step::Close(CloseReason::ClientGone),
                },
            };
            match step {
                Step::Push(event) => {
                    yield Ok::<_, Infallible>(to_sse(event));
                }
                Step::Close(reason) => {
                    guard.close(reason).await;
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive)))
}
