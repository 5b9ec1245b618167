//! Broker traits.
//!
//! The relay never names a concrete broker. Startup constructs one adapter
//! and injects it as `Arc<dyn PubSub>` and `Arc<dyn KeyValueStore>`.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;
use crate::subscription::Subscription;

/// Publish/subscribe over named channels.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Short adapter name for health output (`"redis"`, `"memory"`).
    fn kind(&self) -> &'static str;

    /// Publish `payload` on `channel`; returns how many subscribers received it.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    /// Subscribe to `channel`. Resolves once the broker confirmed the
    /// subscription, so a publish issued afterwards is delivered to it.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    /// Round-trip check of the broker connection.
    async fn ping(&self) -> Result<()>;

    /// Drop connections and end every open subscription.
    async fn close(&self);
}

/// String key/value store with expiry and integer counters.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set `key` to `value`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Current value of `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Whether `key` is present and not expired.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Increment the counter at `key` (absent counts as 0) and reset its
    /// expiry to `ttl`. Returns the new value.
    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<i64>;

    /// Decrement the counter at `key` (absent counts as 0), keeping its
    /// expiry. Returns the new value, which may be negative.
    async fn decr(&self, key: &str) -> Result<i64>;

    /// Remove `key`.
    async fn del(&self, key: &str) -> Result<()>;
}
