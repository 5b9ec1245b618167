//! In-process broker.
//!
//! Correct only when every relay participant lives in one process: the
//! single-instance deployment and the test suite. Expiry is measured with
//! `tokio::time::Instant`, so tests can advance paused time past a TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::{BrokerError, Result};
use crate::fanout::Fanout;
use crate::subscription::Subscription;
use crate::traits::{KeyValueStore, PubSub};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process [`PubSub`] and [`KeyValueStore`].
pub struct MemoryBroker {
    fanout: Arc<Fanout>,
    entries: Mutex<HashMap<String, Entry>>,
    closed: AtomicBool,
}

impl MemoryBroker {
    /// Empty broker.
    pub fn new() -> Self {
        Self {
            fanout: Arc::new(Fanout::new()),
            entries: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    fn parse_counter(key: &str, value: &str) -> Result<i64> {
        value.parse().map_err(|_| BrokerError::InvalidValue {
            key: key.to_owned(),
            reason: format!("not an integer: {value:?}"),
        })
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for MemoryBroker {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        self.ensure_open()?;
        let receivers = self.fanout.dispatch(channel, payload);
        debug!(channel, receivers, "published");
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        self.ensure_open()?;
        let (id, messages) = self.fanout.add(channel);
        let fanout: Weak<Fanout> = Arc::downgrade(&self.fanout);
        let owned = channel.to_owned();
        Ok(Subscription::new(channel.to_owned(), messages, move || {
            if let Some(fanout) = fanout.upgrade() {
                let _ = fanout.remove(&owned, id);
            }
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.fanout.clear();
    }
}

#[async_trait]
impl KeyValueStore for MemoryBroker {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.ensure_open()?;
        let _ = self.entries.lock().insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                let _ = entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<i64> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let current = match entries.get(key) {
            Some(entry) if entry.is_live(now) => Self::parse_counter(key, &entry.value)?,
            _ => 0,
        };
        let next = current + 1;
        let _ = entries.insert(
            key.to_owned(),
            Entry {
                value: next.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(next)
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let (current, expires_at) = match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                (Self::parse_counter(key, &entry.value)?, entry.expires_at)
            }
            _ => (0, None),
        };
        let next = current - 1;
        let _ = entries.insert(
            key.to_owned(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        let _ = self.entries.lock().remove(key);
        Ok(())
    }
}
