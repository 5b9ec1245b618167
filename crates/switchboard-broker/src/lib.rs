//! # switchboard-broker
//!
//! Shared infrastructure behind the session relay:
//!
//! - [`PubSub`] and [`KeyValueStore`] traits, the seam every relay component
//!   talks through
//! - [`RedisBroker`]: one lazily created publish connection and one
//!   subscribe connection per process, recreated with backoff after failure
//! - [`MemoryBroker`]: in-process implementation for single-instance
//!   deployments and tests
//! - [`SessionRegistry`]: TTL-bound session records under `mcp:session:<id>`
//! - [`LivenessTracker`]: per-session subscriber counts under
//!   `mcp:subscribers:<id>`, self-healing from local knowledge

#![deny(unsafe_code)]

pub mod errors;
mod fanout;
pub mod liveness;
pub mod memory;
pub mod redis_broker;
pub mod registry;
mod subscriber;
pub mod subscription;
pub mod traits;

use std::sync::Arc;

pub use errors::{BrokerError, Result};
pub use liveness::LivenessTracker;
pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;
pub use registry::SessionRegistry;
pub use subscription::{Message, Subscription};
pub use traits::{KeyValueStore, PubSub};

/// Broker reconnects (counter, labels: connection).
pub const BROKER_RECONNECTS_TOTAL: &str = "broker_reconnects_total";

/// Both halves of one broker, as injected into the relay.
#[derive(Clone)]
pub struct BrokerHandles {
    /// Publish/subscribe half.
    pub pubsub: Arc<dyn PubSub>,
    /// Key/value half.
    pub store: Arc<dyn KeyValueStore>,
}

impl BrokerHandles {
    /// Split one broker implementing both traits into handles.
    pub fn new<B>(broker: Arc<B>) -> Self
    where
        B: PubSub + KeyValueStore + 'static,
    {
        Self {
            pubsub: broker.clone(),
            store: broker,
        }
    }

    /// Fresh in-process broker.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBroker::new()))
    }
}
