//! Per-process channel → listener table.
//!
//! Both adapters deliver incoming messages through one `Fanout`: the memory
//! broker publishes straight into it, the Redis broker's reader task feeds
//! it from the subscribe connection. The set of channels with listeners is
//! also what the Redis subscribe connection resubscribes after a reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::subscription::Message;

type Listener = (u64, mpsc::UnboundedSender<Message>);

#[derive(Default)]
pub(crate) struct Fanout {
    channels: Mutex<HashMap<String, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl Fanout {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a listener; returns its id and receiving end.
    pub(crate) fn add(&self, channel: &str) -> (u64, mpsc::UnboundedReceiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .entry(channel.to_owned())
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    /// Remove a listener. Returns `true` when the channel has no listeners left.
    pub(crate) fn remove(&self, channel: &str, id: u64) -> bool {
        let mut channels = self.channels.lock();
        let Some(listeners) = channels.get_mut(channel) else {
            return true;
        };
        listeners.retain(|(lid, _)| *lid != id);
        if listeners.is_empty() {
            let _ = channels.remove(channel);
            true
        } else {
            false
        }
    }

    /// Deliver a payload to every listener on `channel`; returns how many got it.
    pub(crate) fn dispatch(&self, channel: &str, payload: &str) -> usize {
        let mut channels = self.channels.lock();
        let Some(listeners) = channels.get_mut(channel) else {
            return 0;
        };
        let mut delivered = 0;
        listeners.retain(|(_, tx)| {
            let ok = tx
                .send(Message {
                    channel: channel.to_owned(),
                    payload: payload.to_owned(),
                })
                .is_ok();
            if ok {
                delivered += 1;
            }
            ok
        });
        if listeners.is_empty() {
            let _ = channels.remove(channel);
        }
        delivered
    }

    pub(crate) fn has_listeners(&self, channel: &str) -> bool {
        self.channels
            .lock()
            .get(channel)
            .is_some_and(|l| !l.is_empty())
    }

    pub(crate) fn channels(&self) -> Vec<String> {
        self.channels.lock().keys().cloned().collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    /// Drop every listener; their receivers yield `None` after draining.
    pub(crate) fn clear(&self) {
        self.channels.lock().clear();
    }
}
