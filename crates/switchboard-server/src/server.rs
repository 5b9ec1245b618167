//! `SwitchboardServer`: the axum HTTP surface.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::context::{CORRELATION_HEADER, RelayContext};
use crate::errors::ApiError;
use crate::health::{self, BrokerHealth, HealthResponse};
use crate::relay::Relay;
use crate::shutdown::ShutdownCoordinator;
use crate::sse;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relay machinery.
    pub relay: Arc<Relay>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay's HTTP server.
pub struct SwitchboardServer {
    relay: Arc<Relay>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl SwitchboardServer {
    /// Create a server over `relay`.
    pub fn new(relay: Arc<Relay>) -> Self {
        Self {
            relay,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: self.relay.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/sse", get(sse_handler))
            .route("/message", post(message_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(DefaultBodyLimit::max(self.relay.config().max_body_bytes))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Get the relay.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Serve on `listener` until the shutdown coordinator fires, then close
    /// every locally owned session.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "switchboard listening");

        let token = self.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;

        self.shutdown.graceful_shutdown(&self.relay, None).await;
        info!("switchboard stopped");
        Ok(())
    }
}

/// Query string of `POST /message`.
#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// GET /sse
async fn sse_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match sse::open_stream(state.relay.clone(), state.shutdown.token(), &headers).await {
        Ok(stream) => stream.into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

/// POST /message?sessionId=<id>
async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    request: Request<Body>,
) -> Response {
    let ctx = RelayContext::from_headers(request.headers());
    let mut response = match state
        .relay
        .deliver(&ctx, query.session_id.as_deref(), request)
        .await
    {
        Ok(response) => response,
        Err(err) => ApiError(err).into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(ctx.correlation_id.as_str()) {
        let _ = response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let pubsub = state.relay.pubsub();
    let broker = BrokerHealth::from_ping(pubsub.kind(), pubsub.ping().await.is_ok());
    Json(health::health_check(
        state.start_time,
        state.relay.local().len(),
        broker,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
