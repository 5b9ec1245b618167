//! Request capture and synthetic replay.
//!
//! [`capture_request`] freezes a native request into a
//! [`SerializedRequest`]; a [`RequestReplay`] thaws it back into an
//! `http::Request` shaped exactly like one that arrived over the network,
//! so the protocol handler runs the same code path either way.
//! [`capture_response`] and [`into_http_response`] do the same for the
//! handler's answer.

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::http::{HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use switchboard_core::{
    CorrelationId, HeaderBytes, RelayError, RelayResponse, RequestId, SerializedRequest, SessionId,
};
use tracing::warn;

/// Marker extension on requests rebuilt from the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replayed {
    /// Exchange the request belongs to.
    pub request_id: RequestId,
    /// Correlation ID of the instance that received the original call.
    pub correlation_id: CorrelationId,
}

/// Rebuilds handler requests from serialized ones.
pub trait RequestReplay: Send + Sync {
    /// Produce a request indistinguishable from a natively received one.
    fn replay(&self, request: &SerializedRequest) -> Result<Request<Body>, RelayError>;
}

/// Replay into a plain `http::Request` with a buffered body.
///
/// The body is a single data frame, readable whole with `to_bytes` or
/// frame by frame as a stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpReplay;

impl RequestReplay for HttpReplay {
    fn replay(&self, request: &SerializedRequest) -> Result<Request<Body>, RelayError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| RelayError::Replay(format!("method {:?}: {e}", request.method)))?;

        let mut builder = Request::builder().method(method).uri(request.url.as_str());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RelayError::Replay(format!("header name {name:?}: {e}")))?;
            let value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|e| RelayError::Replay(format!("header {name} value: {e}")))?;
            builder = builder.header(name, value);
        }

        let mut replayed = builder
            .body(Body::from(request.body.clone()))
            .map_err(|e| RelayError::Replay(e.to_string()))?;
        let _ = replayed.extensions_mut().insert(Replayed {
            request_id: request.request_id.clone(),
            correlation_id: request.correlation_id.clone(),
        });
        Ok(replayed)
    }
}

/// Freeze a native request for publication.
pub async fn capture_request(
    session_id: &SessionId,
    correlation_id: &CorrelationId,
    request: Request<Body>,
    max_body_bytes: usize,
) -> Result<SerializedRequest, RelayError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, max_body_bytes)
        .await
        .map_err(|e| RelayError::BodyRead(e.to_string()))?;

    let url = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_owned(), |pq| pq.as_str().to_owned());

    Ok(SerializedRequest {
        request_id: RequestId::new(),
        session_id: session_id.clone(),
        correlation_id: correlation_id.clone(),
        method: parts.method.as_str().to_owned(),
        url,
        headers: header_pairs(&parts.headers),
        body: body.to_vec(),
    })
}

/// Capture a handler response for publication.
pub async fn capture_response(
    request_id: RequestId,
    response: Response<Body>,
    max_body_bytes: usize,
) -> Result<RelayResponse, RelayError> {
    let (parts, body) = response.into_parts();
    let body = axum::body::to_bytes(body, max_body_bytes)
        .await
        .map_err(|e| RelayError::BodyRead(format!("handler response: {e}")))?;
    Ok(RelayResponse::new(
        request_id,
        parts.status.as_u16(),
        header_pairs(&parts.headers),
        body.to_vec(),
    ))
}

/// Turn a relayed response back into the caller's HTTP response.
///
/// Framing headers are recomputed from the body rather than copied.
pub fn into_http_response(response: RelayResponse) -> Response<Body> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = status;

    let headers = out.headers_mut();
    for (name, value) in response.headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) else {
            warn!(header = %name, "dropping unrepresentable relayed header");
            continue;
        };
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        headers.append(name, value);
    }
    out
}

fn header_pairs(headers: &axum::http::HeaderMap) -> Vec<(String, HeaderBytes)> {
    headers
        .iter()
        .map(|(name, value)| (name.as_str().to_owned(), HeaderBytes::from(value.as_bytes())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn native_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/message?sessionId=abc123&x=1")
            .header("content-type", "application/json")
            .header("x-tag", "a")
            .header("x-tag", "b")
            .body(Body::from(body))
            .unwrap()
    }

    async fn capture(body: Vec<u8>) -> SerializedRequest {
        capture_request(
            &SessionId::from("abc123"),
            &CorrelationId::from("c-1"),
            native_request(body),
            1024 * 1024,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn capture_keeps_method_uri_and_repeated_headers() {
        let captured = capture(br#"{"op":"ping"}"#.to_vec()).await;
        assert_eq!(captured.method, "POST");
        assert_eq!(captured.url, "/message?sessionId=abc123&x=1");
        let tags: Vec<&str> = captured.header_values("x-tag").collect();
        assert_eq!(tags, vec!["a", "b"]);
        assert_eq!(captured.body, br#"{"op":"ping"}"#);
    }

    #[tokio::test]
    async fn replay_matches_native_shape() {
        let captured = capture(br#"{"op":"ping"}"#.to_vec()).await;
        let wire = captured.to_json().unwrap();
        let replayed = HttpReplay
            .replay(&SerializedRequest::from_json(&wire).unwrap())
            .unwrap();

        assert_eq!(replayed.method(), Method::POST);
        assert_eq!(replayed.uri(), "/message?sessionId=abc123&x=1");
        let tags: Vec<&str> = replayed
            .headers()
            .get_all("x-tag")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(tags, vec!["a", "b"]);
        assert_eq!(
            replayed.extensions().get::<Replayed>().unwrap().request_id,
            captured.request_id
        );

        let body = axum::body::to_bytes(replayed.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"op":"ping"}"#);
    }

    #[tokio::test]
    async fn replayed_body_streams() {
        use futures::StreamExt;

        let captured = capture(b"streamed".to_vec()).await;
        let replayed = HttpReplay.replay(&captured).unwrap();
        let mut stream = replayed.into_body().into_data_stream();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"streamed");
    }

    #[tokio::test]
    async fn oversized_body_is_a_body_read_error() {
        let err = capture_request(
            &SessionId::from("abc123"),
            &CorrelationId::from("c-1"),
            native_request(vec![0; 64]),
            16,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_BODY");
    }

    #[test]
    fn invalid_method_is_a_replay_error() {
        let request = SerializedRequest {
            request_id: RequestId::from("r-1"),
            session_id: SessionId::from("abc123"),
            correlation_id: CorrelationId::from("c-1"),
            method: "NOT A METHOD".into(),
            url: "/".into(),
            headers: vec![],
            body: vec![],
        };
        let err = HttpReplay.replay(&request).unwrap_err();
        assert_eq!(err.code(), "REPLAY_ERROR");
    }

    #[tokio::test]
    async fn response_round_trip_drops_framing_headers() {
        let handler_response = Response::builder()
            .status(201)
            .header("content-type", "text/plain")
            .header("content-length", "4")
            .header("set-cookie", "a=1")
            .header("set-cookie", "b=2")
            .body(Body::from("pong"))
            .unwrap();
        let relayed = capture_response(RequestId::from("r-1"), handler_response, 1024)
            .await
            .unwrap();
        assert_eq!(relayed.status, 201);

        let wire = RelayResponse::from_json(&relayed.to_json().unwrap()).unwrap();
        let out = into_http_response(wire);
        assert_eq!(out.status(), StatusCode::CREATED);
        assert!(out.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(out.headers().get_all("set-cookie").iter().count(), 2);
        let body = axum::body::to_bytes(out.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"pong");
    }

    #[test]
    fn out_of_range_status_becomes_bad_gateway() {
        let out = into_http_response(RelayResponse::new(RequestId::from("r"), 42, vec![], vec![]));
        assert_eq!(out.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn opaque_header_bytes_survive_request_and_response() {
        let raw = HeaderValue::from_bytes(b"caf\xe9").unwrap();
        let mut request = native_request(vec![]);
        let _ = request.headers_mut().insert("x-latin1", raw.clone());
        let captured = capture_request(
            &SessionId::from("abc123"),
            &CorrelationId::from("c-1"),
            request,
            1024,
        )
        .await
        .unwrap();
        let wire = SerializedRequest::from_json(&captured.to_json().unwrap()).unwrap();
        let replayed = HttpReplay.replay(&wire).unwrap();
        assert_eq!(replayed.headers()["x-latin1"], raw);

        let handler_response = Response::builder()
            .header("x-latin1", raw.clone())
            .body(Body::empty())
            .unwrap();
        let relayed = capture_response(RequestId::from("r-1"), handler_response, 1024)
            .await
            .unwrap();
        let out = into_http_response(RelayResponse::from_json(&relayed.to_json().unwrap()).unwrap());
        assert_eq!(out.headers()["x-latin1"], raw);
    }

    proptest! {
        #[test]
        fn replay_preserves_arbitrary_header_bytes(
            values in proptest::collection::vec(
                proptest::collection::vec(
                    prop_oneof![Just(b'\t'), 0x20u8..0x7f, 0x80u8..=0xff],
                    0..32,
                ),
                1..4,
            )
        ) {
            let mut request = native_request(vec![]);
            for value in &values {
                let _ = request
                    .headers_mut()
                    .append("x-opaque", HeaderValue::from_bytes(value).unwrap());
            }
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let replayed = rt.block_on(async {
                let captured = capture_request(
                    &SessionId::from("abc123"),
                    &CorrelationId::from("c-1"),
                    request,
                    1024,
                )
                .await
                .unwrap();
                let wire = SerializedRequest::from_json(&captured.to_json().unwrap()).unwrap();
                HttpReplay.replay(&wire).unwrap()
            });
            let back: Vec<Vec<u8>> = replayed
                .headers()
                .get_all("x-opaque")
                .iter()
                .map(|v| v.as_bytes().to_vec())
                .collect();
            prop_assert_eq!(back, values);
        }

        #[test]
        fn replay_preserves_arbitrary_bodies(body in proptest::collection::vec(any::<u8>(), 0..256)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let out = rt.block_on(async {
                let captured = capture(body.clone()).await;
                let wire = SerializedRequest::from_json(&captured.to_json().unwrap()).unwrap();
                let replayed = HttpReplay.replay(&wire).unwrap();
                axum::body::to_bytes(replayed.into_body(), usize::MAX).await.unwrap()
            });
            prop_assert_eq!(out.to_vec(), body);
        }
    }
}
