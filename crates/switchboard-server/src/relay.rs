//! Inbound relay: the publisher side.
//!
//! Runs on whichever instance received a `POST /message`. States:
//!
//! ```text
//! VALIDATE ─► (local owner? ─► execute locally ─► DELIVER | TIMEOUT)
//!          ─► EXISTS ─► CHECK_LIVENESS ─► PUBLISH ─► AWAIT_RESPONSE ─► DELIVER
//!                                                               └──► TIMEOUT
//! ```
//!
//! The response subscription is confirmed before the request is published,
//! so a fast owner cannot answer into the void. Dropping the `deliver`
//! future (client hung up) drops the subscription and the timer with it.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use switchboard_broker::{BrokerHandles, LivenessTracker, PubSub, SessionRegistry};
use switchboard_core::channels::{request_channel, response_channel};
use switchboard_core::{RelayError, RelayResponse, RequestId, SessionId, SessionMetadata};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::RelayConfig;
use crate::context::RelayContext;
use crate::handler::{SessionEvent, SharedHandler};
use crate::local::LocalSessions;
use crate::metrics::{RELAY_REQUEST_DURATION_SECONDS, RELAY_REQUESTS_TOTAL};
use crate::owner::{CloseReason, ConnectionOwner};
use crate::replay::{HttpReplay, RequestReplay, capture_request, into_http_response};

/// Shared relay machinery for one process.
pub struct Relay {
    pub(crate) config: RelayConfig,
    pub(crate) pubsub: Arc<dyn PubSub>,
    pub(crate) registry: SessionRegistry,
    pub(crate) liveness: LivenessTracker,
    pub(crate) local: LocalSessions,
    pub(crate) handler: SharedHandler,
    pub(crate) replay: Arc<dyn RequestReplay>,
}

impl Relay {
    /// Wire the relay over an injected broker.
    pub fn new(config: RelayConfig, broker: BrokerHandles, handler: SharedHandler) -> Self {
        Self::with_replay(config, broker, handler, Arc::new(HttpReplay))
    }

    /// Wire the relay with a custom replay mechanism.
    pub fn with_replay(
        config: RelayConfig,
        broker: BrokerHandles,
        handler: SharedHandler,
        replay: Arc<dyn RequestReplay>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(broker.store.clone(), config.session_ttl),
            liveness: LivenessTracker::new(broker.store, config.session_ttl),
            pubsub: broker.pubsub,
            local: LocalSessions::new(),
            handler,
            replay,
            config,
        }
    }

    /// Relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Session registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Liveness tracker.
    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    /// Sessions owned by this process.
    pub fn local(&self) -> &LocalSessions {
        &self.local
    }

    /// Broker publish/subscribe half.
    pub fn pubsub(&self) -> &Arc<dyn PubSub> {
        &self.pubsub
    }

    /// Open a session owned by this process.
    pub async fn open_session(
        self: &Arc<Self>,
        ctx: &RelayContext,
        metadata: SessionMetadata,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Arc<ConnectionOwner>, RelayError> {
        ConnectionOwner::open(self.clone(), ctx.correlation_id.clone(), metadata, events).await
    }

    /// Close every locally owned session.
    pub async fn close_all(&self, reason: CloseReason) {
        let owners = self.local.owners();
        if owners.is_empty() {
            return;
        }
        info!(count = owners.len(), reason = reason.as_str(), "closing local sessions");
        let _ = futures::future::join_all(owners.iter().map(|owner| owner.close(reason))).await;
    }

    /// Deliver one call to the session's owner and return its response.
    #[instrument(skip_all, fields(session_id, correlation_id = %ctx.correlation_id))]
    pub async fn deliver(
        &self,
        ctx: &RelayContext,
        session_id: Option<&str>,
        request: Request<Body>,
    ) -> Result<Response<Body>, RelayError> {
        let result = self.deliver_inner(ctx, session_id, request).await;
        let (outcome, path) = match &result {
            Ok((_, path)) => ("delivered", *path),
            Err(err) => (err.outcome(), "none"),
        };
        metrics::counter!(RELAY_REQUESTS_TOTAL, "outcome" => outcome, "path" => path).increment(1);
        metrics::histogram!(RELAY_REQUEST_DURATION_SECONDS, "path" => path)
            .record(ctx.elapsed().as_secs_f64());
        match &result {
            Ok(_) => debug!(path, elapsed_ms = ctx.elapsed().as_millis(), "call delivered"),
            Err(err) => debug!(outcome, error = %err, "call not delivered"),
        }
        result.map(|(response, _)| response)
    }

    async fn deliver_inner(
        &self,
        ctx: &RelayContext,
        session_id: Option<&str>,
        request: Request<Body>,
    ) -> Result<(Response<Body>, &'static str), RelayError> {
        // VALIDATE
        let session_id = session_id
            .map(SessionId::from)
            .filter(SessionId::is_well_formed)
            .ok_or(RelayError::MissingSessionId)?;
        let _ = tracing::Span::current().record("session_id", session_id.as_str());

        let timeout = self.config.response_timeout;
        if let Some(owner) = self.local.get(&session_id) {
            let serialized = capture_request(
                &session_id,
                &ctx.correlation_id,
                request,
                self.config.max_body_bytes,
            )
            .await?;
            // Same deadline as the broker path, including time queued behind serialized calls.
            return match tokio::time::timeout(timeout, owner.execute(&serialized)).await {
                Ok(response) => Ok((into_http_response(response), "local")),
                Err(_) => Err(RelayError::ResponseTimeout {
                    session_id,
                    request_id: serialized.request_id,
                    after: timeout,
                }),
            };
        }

        if !self.registry.exists(&session_id).await? {
            return Err(RelayError::UnknownSession(session_id));
        }

        // CHECK_LIVENESS
        if self.liveness.get(&session_id).await? == 0 {
            return Err(RelayError::UnreachableSession(session_id));
        }

        let serialized = capture_request(
            &session_id,
            &ctx.correlation_id,
            request,
            self.config.max_body_bytes,
        )
        .await?;
        let request_id = serialized.request_id.clone();
        let payload = serialized.to_json()?;

        let outcome =
            tokio::time::timeout(timeout, self.exchange(&session_id, &request_id, &payload)).await;
        match outcome {
            Ok(response) => Ok((into_http_response(response?), "broker")),
            Err(_) => Err(RelayError::ResponseTimeout {
                session_id,
                request_id,
                after: timeout,
            }),
        }
    }

    /// PUBLISH and AWAIT_RESPONSE: listen for the answer before asking.
    async fn exchange(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
        payload: &str,
    ) -> Result<RelayResponse, RelayError> {
        let mut responses = self
            .pubsub
            .subscribe(&response_channel(session_id, request_id))
            .await?;
        let receivers = self
            .pubsub
            .publish(&request_channel(session_id), payload)
            .await?;
        if receivers == 0 {
            warn!(request_id = %request_id, "no owner received the request");
            return Err(RelayError::UnreachableSession(session_id.clone()));
        }
        debug!(request_id = %request_id, receivers, "request published");

        let message = responses.recv().await.ok_or_else(|| {
            RelayError::Broker("response subscription closed before a reply".into())
        })?;
        responses.unsubscribe();
        RelayResponse::from_json(&message.payload)
    }
}
