//! Branded ID newtypes for type safety.
//!
//! A session ID, a request ID, and a correlation ID are all strings on the
//! wire. Wrapping each in its own newtype keeps a request ID from being
//! passed where a session ID is expected when building channel names.
//!
//! Session IDs are random (UUID v4) because they are handed to clients as
//! opaque tokens. Request and correlation IDs are UUID v7 so they sort by
//! creation time in logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $gen:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID.
            #[must_use]
            pub fn new() -> Self {
                Self($gen)
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Opaque token identifying one push-connection session.
    SessionId, Uuid::new_v4().simple().to_string()
}

branded_id! {
    /// Identifier of one request/response exchange within a session.
    RequestId, Uuid::now_v7().to_string()
}

branded_id! {
    /// Correlation ID threaded through logs for one inbound call or session.
    CorrelationId, Uuid::now_v7().to_string()
}

impl SessionId {
    /// Whether the token is usable in broker channel names.
    ///
    /// `:` separates segments of the response channel name, so a session ID
    /// containing one would make `responses:<sid>:<rid>` ambiguous.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 128
            && !self.0.contains(':')
            && !self.0.chars().any(char::is_whitespace)
    }
}
