//! Multi-instance relay scenarios: two servers sharing one broker, the
//! push connection held by one and calls arriving at the other.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, BodyDataStream};
use axum::http::{Request, Response, StatusCode};
use futures::StreamExt;
use parking_lot::Mutex;
use switchboard_broker::BrokerHandles;
use switchboard_core::channels::{request_channel, response_channel};
use switchboard_core::logging::capture_logs;
use switchboard_core::{RelayResponse, RequestId, SessionId};
use switchboard_server::{
    HandlerError, HandlerResult, ProtocolHandler, Relay, RelayConfig, SessionEvent, SessionHandle,
    SwitchboardServer,
};
use tower::ServiceExt;
use tracing::Level;

/// Answers by `op`: ping, echo, notify, slow, fail, panic.
struct Scripted;

#[async_trait]
impl ProtocolHandler for Scripted {
    async fn handle(&self, session: SessionHandle, request: Request<Body>) -> HandlerResult {
        let body = axum::body::to_bytes(request.into_body(), 64 * 1024)
            .await
            .map_err(|e| HandlerError::BadRequest(e.to_string()))?;
        let call: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| HandlerError::BadRequest(e.to_string()))?;

        match call["op"].as_str() {
            Some("ping") => Ok(Response::new(Body::from("pong"))),
            Some("echo") => Ok(Response::builder()
                .status(StatusCode::CREATED)
                .header("x-echo", "1")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap()),
            Some("notify") => {
                let _ = session.send(SessionEvent::named("notice", "hi"));
                Ok(Response::builder()
                    .status(StatusCode::ACCEPTED)
                    .body(Body::empty())
                    .unwrap())
            }
            Some("slow") => {
                tokio::time::sleep(Duration::from_secs(15)).await;
                Ok(Response::new(Body::from("late")))
            }
            Some("fail") => Err(HandlerError::Internal("boom".into())),
            Some("panic") => panic!("handler exploded"),
            _ => Err(HandlerError::BadRequest("unknown op".into())),
        }
    }
}

/// Records the start and end of every call, to observe interleaving.
struct Recording {
    trace: Mutex<Vec<String>>,
}

#[async_trait]
impl ProtocolHandler for Recording {
    async fn handle(&self, _session: SessionHandle, request: Request<Body>) -> HandlerResult {
        let body = axum::body::to_bytes(request.into_body(), 1024)
            .await
            .map_err(|e| HandlerError::BadRequest(e.to_string()))?;
        let name = String::from_utf8_lossy(&body).into_owned();
        self.trace.lock().push(format!("start {name}"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.trace.lock().push(format!("end {name}"));
        Ok(Response::new(Body::from(name)))
    }

    fn requires_serialized_access(&self) -> bool {
        true
    }
}

struct Cluster {
    broker: BrokerHandles,
    owner: SwitchboardServer,
    relay: SwitchboardServer,
}

impl Cluster {
    fn new(handler: Arc<dyn ProtocolHandler>) -> Self {
        let broker = BrokerHandles::memory();
        let server = |broker: &BrokerHandles| {
            SwitchboardServer::new(Arc::new(Relay::new(
                RelayConfig::default(),
                broker.clone(),
                handler.clone(),
            )))
        };
        Self {
            owner: server(&broker),
            relay: server(&broker),
            broker,
        }
    }

    fn owner_app(&self) -> Router {
        self.owner.router()
    }

    fn relay_app(&self) -> Router {
        self.relay.router()
    }
}

/// Open a push stream on `app`; returns the message endpoint and the stream.
async fn open_session(app: Router) -> (String, BodyDataStream) {
    let req = Request::builder().uri("/sse").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let mut events = resp.into_body().into_data_stream();
    let first = events.next().await.unwrap().unwrap();
    let endpoint = String::from_utf8(first.to_vec())
        .unwrap()
        .lines()
        .find_map(|line| line.strip_prefix("data: ").map(str::to_owned))
        .unwrap();
    (endpoint, events)
}

fn session_of(endpoint: &str) -> SessionId {
    SessionId::from(endpoint.trim_start_matches("/message?sessionId="))
}

async fn post(app: Router, uri: &str, body: &str) -> Response<Body> {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_owned()))
        .unwrap();
    app.oneshot(req).await.unwrap()
}

async fn body_text(resp: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn error_code(resp: Response<Body>) -> String {
    let value: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    value["error"]["code"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn ping_through_another_instance() {
    let cluster = Cluster::new(Arc::new(Scripted));
    let (endpoint, _events) = open_session(cluster.owner_app()).await;
    assert!(cluster.relay.relay().local().is_empty());

    let resp = post(cluster.relay_app(), &endpoint, r#"{"op":"ping"}"#).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "pong");
}

#[tokio::test]
async fn relayed_response_matches_native_response() {
    let cluster = Cluster::new(Arc::new(Scripted));
    let (endpoint, _events) = open_session(cluster.owner_app()).await;
    let call = r#"{"op":"echo","n":1}"#;

    let native = post(cluster.owner_app(), &endpoint, call).await;
    let relayed = post(cluster.relay_app(), &endpoint, call).await;

    assert_eq!(native.status(), StatusCode::CREATED);
    assert_eq!(relayed.status(), native.status());
    assert_eq!(relayed.headers()["x-echo"], native.headers()["x-echo"]);
    assert_eq!(
        relayed.headers()["content-type"],
        native.headers()["content-type"]
    );
    assert_eq!(body_text(relayed).await, body_text(native).await);
}

#[tokio::test]
async fn handler_events_reach_the_owning_stream() {
    let cluster = Cluster::new(Arc::new(Scripted));
    let (endpoint, mut events) = open_session(cluster.owner_app()).await;

    let resp = post(cluster.relay_app(), &endpoint, r#"{"op":"notify"}"#).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let pushed = events.next().await.unwrap().unwrap();
    let pushed = String::from_utf8(pushed.to_vec()).unwrap();
    assert!(pushed.contains("event: notice"));
    assert!(pushed.contains("data: hi"));
}

#[tokio::test]
async fn unknown_session_is_rejected_immediately() {
    let cluster = Cluster::new(Arc::new(Scripted));
    let resp = post(cluster.relay_app(), "/message?sessionId=unknown", "{}").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(resp).await, "VALIDATION_ERROR");
}

#[tokio::test]
async fn missing_session_id_is_rejected() {
    let cluster = Cluster::new(Arc::new(Scripted));
    let resp = post(cluster.relay_app(), "/message", "{}").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn registered_session_without_owner_is_unreachable_without_waiting() {
    let cluster = Cluster::new(Arc::new(Scripted));
    let id = SessionId::new();
    assert!(
        cluster
            .relay
            .relay()
            .registry()
            .create(&id, Default::default())
            .await
    );

    let started = tokio::time::Instant::now();
    let resp = post(
        cluster.relay_app(),
        &format!("/message?sessionId={id}"),
        r#"{"op":"ping"}"#,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(error_code(resp).await, "SESSION_UNREACHABLE");
}

#[tokio::test(start_paused = true)]
async fn slow_owner_times_out_and_late_response_finds_no_listener() {
    let (logs, _guard) = capture_logs();
    let cluster = Cluster::new(Arc::new(Scripted));
    let (endpoint, _events) = open_session(cluster.owner_app()).await;

    let started = tokio::time::Instant::now();
    let resp = post(cluster.relay_app(), &endpoint, r#"{"op":"slow"}"#).await;
    assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(error_code(resp).await, "RESPONSE_TIMEOUT");
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(started.elapsed() < Duration::from_secs(15));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(logs.has_event(Level::DEBUG, "response had no listener"));
}

#[tokio::test(start_paused = true)]
async fn slow_owner_times_out_on_the_owning_instance_too() {
    let cluster = Cluster::new(Arc::new(Scripted));
    let (endpoint, _events) = open_session(cluster.owner_app()).await;

    let started = tokio::time::Instant::now();
    let resp = post(cluster.owner_app(), &endpoint, r#"{"op":"slow"}"#).await;
    assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(error_code(resp).await, "RESPONSE_TIMEOUT");
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(started.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
async fn closed_stream_makes_session_unreachable() {
    let cluster = Cluster::new(Arc::new(Scripted));
    let (endpoint, events) = open_session(cluster.owner_app()).await;
    let id = session_of(&endpoint);
    let liveness = cluster.relay.relay().liveness();
    assert_eq!(liveness.get(&id).await.unwrap(), 1);

    drop(events);
    for _ in 0..100 {
        if cluster.owner.relay().local().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cluster.owner.relay().local().is_empty());
    assert_eq!(liveness.get(&id).await.unwrap(), 0);

    let resp = post(cluster.relay_app(), &endpoint, r#"{"op":"ping"}"#).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn close_is_idempotent_and_count_never_negative() {
    let cluster = Cluster::new(Arc::new(Scripted));
    let (endpoint, _events) = open_session(cluster.owner_app()).await;
    let id = session_of(&endpoint);
    let owner = cluster.owner.relay().local().get(&id).unwrap();

    owner.close(switchboard_server::CloseReason::ClientGone).await;
    owner.close(switchboard_server::CloseReason::ClientGone).await;

    assert!(owner.is_closed());
    assert_eq!(cluster.owner.relay().liveness().get(&id).await.unwrap(), 0);
}

#[tokio::test]
async fn handler_failure_becomes_error_response() {
    let cluster = Cluster::new(Arc::new(Scripted));
    let (endpoint, _events) = open_session(cluster.owner_app()).await;

    let resp = post(cluster.relay_app(), &endpoint, r#"{"op":"fail"}"#).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(resp).await, "HANDLER_ERROR");

    let resp = post(cluster.relay_app(), &endpoint, r#"{"op":"nope"}"#).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(resp).await, "INVALID_REQUEST");
}

#[tokio::test]
async fn handler_panic_still_answers() {
    let cluster = Cluster::new(Arc::new(Scripted));
    let (endpoint, _events) = open_session(cluster.owner_app()).await;

    let resp = post(cluster.relay_app(), &endpoint, r#"{"op":"panic"}"#).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(resp).await, "HANDLER_PANICKED");

    let resp = post(cluster.relay_app(), &endpoint, r#"{"op":"ping"}"#).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn undecodable_request_with_request_id_gets_400() {
    let cluster = Cluster::new(Arc::new(Scripted));
    let (endpoint, _events) = open_session(cluster.owner_app()).await;
    let id = session_of(&endpoint);
    let request_id = RequestId::from("r-broken");

    let mut responses = cluster
        .broker
        .pubsub
        .subscribe(&response_channel(&id, &request_id))
        .await
        .unwrap();
    let delivered = cluster
        .broker
        .pubsub
        .publish(&request_channel(&id), r#"{"requestId":"r-broken","method":42}"#)
        .await
        .unwrap();
    assert_eq!(delivered, 1);

    let message = responses.recv().await.unwrap();
    let response = RelayResponse::from_json(&message.payload).unwrap();
    assert_eq!(response.status, 400);
    assert_eq!(response.request_id, request_id);
}

#[tokio::test]
async fn concurrent_calls_run_one_at_a_time_when_handler_requires_it() {
    let handler = Arc::new(Recording {
        trace: Mutex::new(Vec::new()),
    });
    let cluster = Cluster::new(handler.clone());
    let (endpoint, _events) = open_session(cluster.owner_app()).await;

    let (a, b, c) = tokio::join!(
        post(cluster.relay_app(), &endpoint, "a"),
        post(cluster.relay_app(), &endpoint, "b"),
        post(cluster.owner_app(), &endpoint, "c"),
    );
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);
    assert_eq!(c.status(), StatusCode::OK);

    let trace = handler.trace.lock().clone();
    assert_eq!(trace.len(), 6);
    for pair in trace.chunks(2) {
        let started = pair[0].strip_prefix("start ").unwrap();
        assert_eq!(pair[1], format!("end {started}"));
    }
}
