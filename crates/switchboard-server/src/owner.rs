//! Connection owner: the subscriber side of the relay.
//!
//! Lives on the instance holding a session's push connection. While open it
//! listens on `requests:<id>`, replays every inbound request into the local
//! protocol handler, and publishes the handler's answer on
//! `responses:<id>:<requestId>`. Every decodable request gets a response,
//! including when the handler fails or panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use switchboard_broker::Subscription;
use switchboard_core::channels::{request_channel, response_channel};
use switchboard_core::wire::recover_request_id;
use switchboard_core::{
    CorrelationId, RelayError, RelayResponse, SerializedRequest, SessionId, SessionMetadata,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::handler::{SessionEvent, SessionHandle};
use crate::metrics::{OWNER_EXCHANGES_TOTAL, SESSIONS_ACTIVE};
use crate::relay::Relay;
use crate::replay::capture_response;

/// Why a push connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client hung up.
    ClientGone,
    /// The connection reached its self-imposed maximum duration.
    MaxDuration,
    /// The process is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientGone => "client_gone",
            Self::MaxDuration => "max_duration",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Owner of one live session on this instance.
pub struct ConnectionOwner {
    session_id: SessionId,
    correlation_id: CorrelationId,
    relay: Arc<Relay>,
    events: mpsc::Sender<SessionEvent>,
    serial: Option<tokio::sync::Mutex<()>>,
    counted: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
    opened_at: Instant,
}

impl ConnectionOwner {
    /// Register a new session, subscribe to its request channel, and count
    /// the confirmed subscription.
    ///
    /// A registry write failure is logged and the session opens anyway. A
    /// failed subscribe fails the open.
    pub(crate) async fn open(
        relay: Arc<Relay>,
        correlation_id: CorrelationId,
        metadata: SessionMetadata,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Arc<Self>, RelayError> {
        let session_id = SessionId::new();
        let span = info_span!("owner", session_id = %session_id, correlation_id = %correlation_id);

        async {
            let _ = relay.registry.create(&session_id, metadata).await;

            let subscription = relay
                .pubsub
                .subscribe(&request_channel(&session_id))
                .await?;

            // Counted only once the broker confirmed the subscription.
            let counted = match relay.liveness.increment(&session_id).await {
                Ok(count) => {
                    debug!(count, "owner subscribed");
                    true
                }
                Err(err) => {
                    warn!(error = %err, "failed to count subscriber; remote relays may see the session as unreachable");
                    false
                }
            };

            let serialized =
                relay.config.serialize_handlers || relay.handler.requires_serialized_access();
            let owner = Arc::new(Self {
                session_id: session_id.clone(),
                correlation_id: correlation_id.clone(),
                relay: relay.clone(),
                events,
                serial: serialized.then(|| tokio::sync::Mutex::new(())),
                counted: AtomicBool::new(counted),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                listener: parking_lot::Mutex::new(None),
                opened_at: Instant::now(),
            });

            relay.local.insert(owner.clone());
            metrics::gauge!(SESSIONS_ACTIVE).increment(1.0);

            let listener = tokio::spawn(
                owner
                    .clone()
                    .listen(subscription)
                    .instrument(tracing::Span::current()),
            );
            *owner.listener.lock() = Some(listener);

            info!(serialized, "session opened");
            Ok::<_, RelayError>(owner)
        }
        .instrument(span)
        .await
    }

    /// Session token.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Correlation ID of the request that opened the session.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Handle for pushing events to this session's stream.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(self.session_id.clone(), self.events.clone())
    }

    async fn listen(self: Arc<Self>, mut subscription: Subscription) {
        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => break,
                msg = subscription.recv() => msg,
            };
            let Some(message) = message else {
                warn!("request subscription ended");
                break;
            };

            if self.serial.is_some() {
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = self.clone().respond(message.payload) => {}
                }
            } else {
                let _ = tokio::spawn(
                    self.clone()
                        .respond(message.payload)
                        .instrument(tracing::Span::current()),
                );
            }
        }
        subscription.unsubscribe();
        debug!("request listener stopped");
    }

    async fn respond(self: Arc<Self>, payload: String) {
        let request = match SerializedRequest::from_json(&payload) {
            Ok(request) => request,
            Err(err) => {
                if let Some(request_id) = recover_request_id(&payload) {
                    warn!(request_id = %request_id, error = %err, "undecodable request");
                    let response = RelayResponse::error(
                        request_id,
                        400,
                        "INVALID_REQUEST",
                        &format!("request could not be decoded: {err}"),
                    );
                    self.publish(&response).await;
                } else {
                    warn!(error = %err, "dropping undecodable request without a requestId");
                }
                return;
            }
        };

        let span = info_span!(
            "exchange",
            request_id = %request.request_id,
            relay_correlation_id = %request.correlation_id,
        );
        async {
            let response = self.execute(&request).await;
            self.publish(&response).await;
        }
        .instrument(span)
        .await;
    }

    /// Run one request through the local handler and capture its answer.
    ///
    /// Used for broker-delivered requests and for the local fast path alike.
    pub async fn execute(&self, request: &SerializedRequest) -> RelayResponse {
        let _turn = match &self.serial {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        let request_id = request.request_id.clone();

        let replayed = match self.relay.replay.replay(request) {
            Ok(replayed) => replayed,
            Err(err) => {
                warn!(error = %err, "request replay failed");
                metrics::counter!(OWNER_EXCHANGES_TOTAL, "outcome" => "replay_error").increment(1);
                return RelayResponse::error(request_id, err.status_code(), err.code(), &err.to_string());
            }
        };

        let handler = self.relay.handler.clone();
        let session = self.handle();
        let outcome = tokio::spawn(
            async move { handler.handle(session, replayed).await }
                .instrument(tracing::Span::current()),
        )
        .await;

        let (response, label) = match outcome {
            Ok(Ok(native)) => {
                match capture_response(request_id.clone(), native, self.relay.config.max_body_bytes).await {
                    Ok(response) => (response, "ok"),
                    Err(err) => {
                        warn!(error = %err, "handler response could not be captured");
                        (
                            RelayResponse::error(request_id, 500, "HANDLER_ERROR", &err.to_string()),
                            "handler_error",
                        )
                    }
                }
            }
            Ok(Err(err)) => {
                debug!(error = %err, "handler returned an error");
                (
                    RelayResponse::error(request_id, err.status_code(), err.code(), &err.to_string()),
                    "handler_error",
                )
            }
            Err(join) => {
                error!(panicked = join.is_panic(), "handler task failed");
                (
                    RelayResponse::error(request_id, 500, "HANDLER_PANICKED", "handler terminated unexpectedly"),
                    "panic",
                )
            }
        };
        metrics::counter!(OWNER_EXCHANGES_TOTAL, "outcome" => label).increment(1);
        response
    }

    async fn publish(&self, response: &RelayResponse) {
        let channel = response_channel(&self.session_id, &response.request_id);
        let payload = match response.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failed to encode response");
                return;
            }
        };
        match self.relay.pubsub.publish(&channel, &payload).await {
            Ok(0) => debug!(status = response.status, "response had no listener; the relay stopped waiting"),
            Ok(receivers) => debug!(status = response.status, receivers, "response published"),
            Err(err) => warn!(error = %err, "failed to publish response"),
        }
    }

    /// Tear the session down: stop listening, release the subscription,
    /// then decrement the liveness count. Each step runs even if an earlier
    /// one failed. Safe to call more than once.
    pub async fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(err) = listener.await {
                warn!(session_id = %self.session_id, error = %err, "request listener ended abnormally");
            }
        }

        if self.counted.swap(false, Ordering::AcqRel) {
            if let Err(err) = self.relay.liveness.decrement(&self.session_id).await {
                warn!(session_id = %self.session_id, error = %err, "failed to decrement subscriber count");
            }
        }

        let _ = self.relay.local.remove(&self.session_id);
        metrics::gauge!(SESSIONS_ACTIVE).decrement(1.0);
        info!(
            session_id = %self.session_id,
            reason = reason.as_str(),
            lifetime_secs = self.opened_at.elapsed().as_secs(),
            "session closed"
        );
    }
}

impl std::fmt::Debug for ConnectionOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOwner")
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
