//! Records exchanged over the broker.
//!
//! Everything crossing a process boundary is JSON with camelCase field
//! names. Bodies are opaque bytes carried as standard base64 so binary
//! content survives. Headers are an ordered list of `[name, value]` pairs so
//! repeated header names survive; a value is a plain string when it is valid
//! UTF-8 and `{"base64": "..."}` when it is not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::RelayError;
use crate::ids::{CorrelationId, RequestId, SessionId};

/// Identifying details captured when a push connection opens.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// `Host` header of the opening request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_host: Option<String>,
    /// Client identifier (`User-Agent` of the opening request).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Correlation ID of the opening request.
    pub correlation_id: CorrelationId,
}

/// Registry record stored under `mcp:session:<id>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session token.
    pub id: SessionId,
    /// When the push connection opened.
    pub created_at: DateTime<Utc>,
    /// Last time the session was touched.
    pub last_active: DateTime<Utc>,
    /// Connection metadata.
    pub metadata: SessionMetadata,
    /// Expiry applied to the registry key, in seconds.
    pub ttl_secs: u64,
}

impl SessionRecord {
    /// Build a fresh record stamped with the current time.
    #[must_use]
    pub fn new(id: SessionId, metadata: SessionMetadata, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_active: now,
            metadata,
            ttl_secs,
        }
    }
}

/// One inbound call, frozen for publication on `requests:<sessionId>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedRequest {
    /// Exchange identifier; names the response channel.
    pub request_id: RequestId,
    /// Session the call targets.
    pub session_id: SessionId,
    /// Correlation ID of the relaying instance's inbound call.
    pub correlation_id: CorrelationId,
    /// HTTP method.
    pub method: String,
    /// Target path including the query string.
    pub url: String,
    /// Ordered header pairs; names may repeat.
    pub headers: Vec<(String, HeaderBytes)>,
    /// Raw body bytes.
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

impl SerializedRequest {
    /// Encode for publication.
    pub fn to_json(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a payload received on a request channel.
    pub fn from_json(payload: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// All UTF-8 values of a header, in order, matched case-insensitively.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .filter_map(|(_, v)| v.to_str())
    }
}

/// Raw bytes of one header value.
///
/// HTTP header values are not required to be UTF-8, so the wire form falls
/// back to base64 for values that are not.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderBytes(pub Vec<u8>);

impl HeaderBytes {
    /// The raw value.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The value as text, if it is valid UTF-8.
    #[must_use]
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<&str> for HeaderBytes {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<&[u8]> for HeaderBytes {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum HeaderRepr<'a> {
    Text(std::borrow::Cow<'a, str>),
    Binary { base64: String },
}

impl Serialize for HeaderBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine;

        let repr = match self.to_str() {
            Some(text) => HeaderRepr::Text(text.into()),
            None => HeaderRepr::Binary {
                base64: base64::engine::general_purpose::STANDARD.encode(&self.0),
            },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HeaderBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use base64::Engine;

        match HeaderRepr::deserialize(deserializer)? {
            HeaderRepr::Text(text) => Ok(Self(text.into_owned().into_bytes())),
            HeaderRepr::Binary { base64 } => base64::engine::general_purpose::STANDARD
                .decode(base64.as_bytes())
                .map(Self)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Pull the `requestId` out of a payload that failed full decoding.
///
/// Lets the owner answer a malformed request with an error response instead
/// of leaving the publisher waiting until timeout.
#[must_use]
pub fn recover_request_id(payload: &str) -> Option<RequestId> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value
        .get("requestId")
        .and_then(serde_json::Value::as_str)
        .map(RequestId::from)
}

/// Handler output, published on `responses:<sessionId>:<requestId>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    /// Exchange this answers.
    pub request_id: RequestId,
    /// HTTP status produced by the handler.
    pub status: u16,
    /// Ordered response header pairs.
    #[serde(default)]
    pub headers: Vec<(String, HeaderBytes)>,
    /// Raw body bytes.
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    /// When the owner produced the response.
    pub timestamp: DateTime<Utc>,
}

impl RelayResponse {
    /// Build a response stamped with the current time.
    #[must_use]
    pub fn new(
        request_id: RequestId,
        status: u16,
        headers: Vec<(String, HeaderBytes)>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            request_id,
            status,
            headers,
            body,
            timestamp: Utc::now(),
        }
    }

    /// Structured error response with a JSON `{ "error": { code, message } }` body.
    #[must_use]
    pub fn error(request_id: RequestId, status: u16, code: &str, message: &str) -> Self {
        let body = serde_json::json!({
            "error": { "code": code, "message": message }
        });
        Self::new(
            request_id,
            status,
            vec![("content-type".into(), "application/json".into())],
            body.to_string().into_bytes(),
        )
    }

    /// Encode for publication.
    pub fn to_json(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a payload received on a response channel.
    pub fn from_json(payload: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(payload)?)
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
