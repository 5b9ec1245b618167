//! Session registry.
//!
//! One JSON [`SessionRecord`] per session under `mcp:session:<id>`, written
//! once when the push connection opens and left to expire. There is no
//! update or delete.

use std::sync::Arc;
use std::time::Duration;

use switchboard_core::channels::session_key;
use switchboard_core::{SessionId, SessionMetadata, SessionRecord};
use tracing::{debug, instrument, warn};

use crate::errors::{BrokerError, Result};
use crate::traits::KeyValueStore;

/// TTL-bound record of which sessions exist.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl SessionRegistry {
    /// Registry over `store`; records expire after `ttl`.
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Record expiry.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store the record for a newly opened session.
    ///
    /// A failed write is logged and swallowed so the push connection still
    /// opens; returns whether the record was stored.
    #[instrument(skip(self, metadata), fields(session_id = %id))]
    pub async fn create(&self, id: &SessionId, metadata: SessionMetadata) -> bool {
        let record = SessionRecord::new(id.clone(), metadata, self.ttl.as_secs());
        let value = match serde_json::to_string(&record) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "failed to encode session record");
                return false;
            }
        };
        match self.store.set_ex(&session_key(id), &value, self.ttl).await {
            Ok(()) => {
                debug!(ttl_secs = self.ttl.as_secs(), "session registered");
                true
            }
            Err(err) => {
                warn!(error = %err, "failed to register session");
                false
            }
        }
    }

    /// Whether the session is registered and not expired.
    pub async fn exists(&self, id: &SessionId) -> Result<bool> {
        self.store.exists(&session_key(id)).await
    }

    /// Stored record, if registered and not expired.
    pub async fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        let key = session_key(id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| BrokerError::InvalidValue {
                key,
                reason: err.to_string(),
            })
    }
}
