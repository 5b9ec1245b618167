//! Redis-backed broker.
//!
//! Each process holds at most two connections, both created lazily:
//!
//! - a multiplexed **command connection** for `PUBLISH` and key/value
//!   commands, shared by every caller
//! - a **subscribe connection**, split into a sink owned by a control task
//!   and a stream owned by a reader task
//!
//! A command that fails with a connection error drops the command
//! connection and is retried once on a fresh one. Reconnect attempts after
//! a failure wait out the backoff delay first. Subscribe-side recovery is
//! handled by the shared subscriber control task.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSubSink};
use switchboard_core::backoff::BackoffConfig;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::BROKER_RECONNECTS_TOTAL;
use crate::errors::{BrokerError, Result};
use crate::subscriber::{MessageStream, SubscribeConnector, SubscribeSink, Subscriber};
use crate::subscription::Subscription;
use crate::traits::{KeyValueStore, PubSub};

/// Redis implementation of [`PubSub`] and [`KeyValueStore`].
pub struct RedisBroker {
    client: redis::Client,
    commands: Mutex<CommandSlot>,
    subscriber: Subscriber,
    backoff: BackoffConfig,
    cancel: CancellationToken,
}

#[derive(Default)]
struct CommandSlot {
    conn: Option<MultiplexedConnection>,
    failures: u32,
    retry_at: Option<Instant>,
    ever_connected: bool,
}

impl RedisBroker {
    /// Validate `url` and start the subscribe control task.
    ///
    /// No connection is opened here; the first command or subscription
    /// connects. Must be called from within a tokio runtime.
    #[allow(clippy::unused_async)]
    pub async fn connect(url: &str, backoff: BackoffConfig) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let cancel = CancellationToken::new();
        let subscriber = Subscriber::start(
            RedisConnector(client.clone()),
            backoff.clone(),
            cancel.clone(),
        );

        info!(url = %redact(url), "redis broker configured");
        Ok(Self {
            client,
            commands: Mutex::new(CommandSlot::default()),
            subscriber,
            backoff,
            cancel,
        })
    }

    async fn command_connection(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.commands.lock().await;
        if let Some(conn) = &slot.conn {
            return Ok(conn.clone());
        }
        if self.cancel.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        if let Some(at) = slot.retry_at {
            tokio::time::sleep_until(at).await;
        }

        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                if slot.ever_connected {
                    metrics::counter!(BROKER_RECONNECTS_TOTAL, "connection" => "command")
                        .increment(1);
                    info!(after_failures = slot.failures, "command connection re-established");
                }
                slot.conn = Some(conn.clone());
                slot.failures = 0;
                slot.retry_at = None;
                slot.ever_connected = true;
                Ok(conn)
            }
            Err(err) => {
                let delay = self.backoff.delay(slot.failures, rand::random());
                slot.failures = slot.failures.saturating_add(1);
                slot.retry_at = Some(Instant::now() + delay);
                warn!(error = %err, retry_in_ms = delay.as_millis(), "command connection failed");
                Err(err.into())
            }
        }
    }

    async fn drop_command_connection(&self) {
        self.commands.lock().await.conn = None;
    }

    /// Run `op` on the command connection, retrying once on a fresh
    /// connection when the first attempt fails with a connection error.
    async fn run<T, F, Fut>(&self, name: &'static str, op: F) -> Result<T>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.command_connection().await?;
        match op(conn).await.map_err(BrokerError::from) {
            Ok(value) => Ok(value),
            Err(err) if err.is_transient() => {
                warn!(command = name, error = %err, "retrying on a fresh connection");
                self.drop_command_connection().await;
                let conn = self.command_connection().await?;
                op(conn).await.map_err(BrokerError::from)
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl PubSub for RedisBroker {
    fn kind(&self) -> &'static str {
        "redis"
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let receivers: usize = self
            .run("PUBLISH", |mut conn| async move {
                redis::cmd("PUBLISH")
                    .arg(channel)
                    .arg(payload)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        debug!(receivers, "published");
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        if self.cancel.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        self.subscriber.subscribe(channel).await
    }

    async fn ping(&self) -> Result<()> {
        let _: String = self
            .run("PING", |mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.subscriber.clear();
        self.drop_command_connection().await;
        info!("redis broker closed");
    }
}

#[async_trait]
impl KeyValueStore for RedisBroker {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let secs = ttl.as_secs().max(1);
        self.run("SET", |mut conn| async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(secs)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run("GET", |mut conn| async move {
            redis::cmd("GET").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let count: i64 = self
            .run("EXISTS", |mut conn| async move {
                redis::cmd("EXISTS").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(count > 0)
    }

    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<i64> {
        let secs = ttl.as_secs().max(1);
        let (count,): (i64,) = self
            .run("INCR", |mut conn| async move {
                redis::pipe()
                    .atomic()
                    .cmd("INCR")
                    .arg(key)
                    .cmd("EXPIRE")
                    .arg(key)
                    .arg(secs)
                    .ignore()
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(count)
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        self.run("DECR", |mut conn| async move {
            redis::cmd("DECR").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<()> {
        let _: i64 = self
            .run("DEL", |mut conn| async move {
                redis::cmd("DEL").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }
}

impl Drop for RedisBroker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("closed", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Opens Redis pub/sub connections for the [`Subscriber`].
struct RedisConnector(redis::Client);

#[async_trait]
impl SubscribeConnector for RedisConnector {
    type Sink = PubSubSink;

    async fn open(&self) -> Result<(PubSubSink, MessageStream)> {
        let (sink, stream) = self.0.get_async_pubsub().await?.split();
        let messages = stream.filter_map(|msg| async move {
            let channel = msg.get_channel_name().to_owned();
            match msg.get_payload::<String>() {
                Ok(payload) => Some((channel, payload)),
                Err(err) => {
                    warn!(channel, error = %err, "dropping non-text pubsub payload");
                    None
                }
            }
        });
        Ok((sink, messages.boxed()))
    }
}

#[async_trait]
impl SubscribeSink for PubSubSink {
    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        PubSubSink::subscribe(self, channel).await?;
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        PubSubSink::unsubscribe(self, channel).await?;
        Ok(())
    }
}

/// Strip credentials from a connection URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_owned(),
    }
}
