//! Subscriber liveness tracking.
//!
//! `mcp:subscribers:<id>` counts the confirmed subscriptions listening on a
//! session's request channel across all instances. The relay reads it to
//! fail fast with "unreachable" instead of waiting out a timeout when no
//! owner is left.
//!
//! Consistency is eventual. The counter carries the session TTL so a
//! crashed owner's increment cannot leak forever. Each process also keeps
//! its own counts; a read that finds the shared counter missing while this
//! process still holds a subscription writes the local count back.
//!
//! The write-back only runs when the owning process itself calls
//! [`LivenessTracker::get`]. The relay never does that for its own
//! sessions, since calls for them take the local path first, so it does
//! not repair a lost counter for other instances. A remote reader of an
//! expired or lost counter sees zero.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use switchboard_core::SessionId;
use switchboard_core::channels::subscribers_key;
use tracing::{debug, instrument, warn};

use crate::errors::Result;
use crate::traits::KeyValueStore;

/// Per-session subscriber counter.
pub struct LivenessTracker {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    local: DashMap<SessionId, i64>,
}

impl LivenessTracker {
    /// Tracker over `store`; counters expire after `ttl` without an increment.
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            local: DashMap::new(),
        }
    }

    /// Record one more confirmed subscription. Returns the shared count.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn increment(&self, id: &SessionId) -> Result<i64> {
        let count = self.store.incr_ex(&subscribers_key(id), self.ttl).await?;
        *self.local.entry(id.clone()).or_insert(0) += 1;
        debug!(count, "subscriber count incremented");
        Ok(count)
    }

    /// Record one fewer subscription. Never drops below zero; the key is
    /// removed once it reaches zero.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn decrement(&self, id: &SessionId) -> Result<i64> {
        let _ = self.local.remove_if_mut(id, |_, count| {
            *count -= 1;
            *count <= 0
        });

        let key = subscribers_key(id);
        let count = self.store.decr(&key).await?;
        if count <= 0 {
            self.store.del(&key).await?;
            debug!("subscriber count reached zero");
            return Ok(0);
        }
        debug!(count, "subscriber count decremented");
        Ok(count)
    }

    /// Current shared count. Absent, expired, or unparsable counts read as
    /// zero unless this process holds a subscription, in which case the
    /// local count is written back and returned.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn get(&self, id: &SessionId) -> Result<i64> {
        let key = subscribers_key(id);
        let stored = match self.store.get(&key).await? {
            Some(raw) => raw.parse::<i64>().unwrap_or_else(|_| {
                warn!(value = %raw, "unparsable subscriber count, treating as zero");
                0
            }),
            None => 0,
        };
        if stored > 0 {
            return Ok(stored);
        }

        let local = self.local_count(id);
        if local <= 0 {
            return Ok(0);
        }
        if let Err(err) = self.store.set_ex(&key, &local.to_string(), self.ttl).await {
            warn!(error = %err, "failed to restore subscriber count");
        }
        debug!(local, "subscriber count restored from local state");
        Ok(local)
    }

    /// Subscriptions this process holds for the session.
    pub fn local_count(&self, id: &SessionId) -> i64 {
        self.local.get(id).map_or(0, |count| *count)
    }
}
