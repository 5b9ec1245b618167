//! Subscribe side of a connection-oriented broker.
//!
//! A single control task owns the subscribe connection's command half and
//! handles subscribe, unsubscribe and reconnect one at a time, so an
//! unsubscribe can never overtake a later subscribe to the same channel. A
//! reader task per connection feeds incoming messages into the shared
//! [`Fanout`]. When a connection is lost, or a subscribe cannot be retried
//! on a fresh one, the control task reconnects with backoff and
//! resubscribes every channel that still has listeners.
//!
//! Connections come from a [`SubscribeConnector`], which is how the Redis
//! adapter plugs in.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use switchboard_core::backoff::BackoffConfig;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::BROKER_RECONNECTS_TOTAL;
use crate::errors::{BrokerError, Result};
use crate::fanout::Fanout;
use crate::subscription::Subscription;

/// Incoming `(channel, payload)` pairs of one subscribe connection. Ends
/// when the connection is lost.
pub(crate) type MessageStream = BoxStream<'static, (String, String)>;

/// Command half of one subscribe connection.
#[async_trait]
pub(crate) trait SubscribeSink: Send {
    async fn subscribe(&mut self, channel: &str) -> Result<()>;
    async fn unsubscribe(&mut self, channel: &str) -> Result<()>;
}

/// Opens subscribe connections.
#[async_trait]
pub(crate) trait SubscribeConnector: Send + Sync + 'static {
    type Sink: SubscribeSink + 'static;

    async fn open(&self) -> Result<(Self::Sink, MessageStream)>;
}

enum Control {
    Subscribe {
        channel: String,
        ack: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        channel: String,
    },
    Reconnect {
        generation: u64,
    },
}

/// Handle to a running control task.
pub(crate) struct Subscriber {
    control: mpsc::UnboundedSender<Control>,
    fanout: Arc<Fanout>,
}

impl Subscriber {
    /// Spawn the control task. It stops when `cancel` fires.
    pub(crate) fn start<C: SubscribeConnector>(
        connector: C,
        backoff: BackoffConfig,
        cancel: CancellationToken,
    ) -> Self {
        let fanout = Arc::new(Fanout::new());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let task = ControlTask {
            connector,
            fanout: fanout.clone(),
            control_rx,
            control_tx: control_tx.clone(),
            backoff,
            sink: None,
            reader_cancel: None,
            generation: 0,
            failures: 0,
            ever_connected: false,
            cancel,
        };
        let _ = tokio::spawn(task.run());
        Self {
            control: control_tx,
            fanout,
        }
    }

    /// Listen on `channel`; resolves once the broker confirmed the subscription.
    pub(crate) async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (id, messages) = self.fanout.add(channel);

        // Built before the confirmation wait so that a failed or cancelled
        // subscribe still releases its listener.
        let fanout = Arc::downgrade(&self.fanout);
        let control = self.control.clone();
        let owned = channel.to_owned();
        let subscription = Subscription::new(channel.to_owned(), messages, move || {
            let Some(fanout) = fanout.upgrade() else {
                return;
            };
            if fanout.remove(&owned, id) {
                let _ = control.send(Control::Unsubscribe { channel: owned });
            }
        });

        let (ack_tx, ack_rx) = oneshot::channel();
        self.control
            .send(Control::Subscribe {
                channel: channel.to_owned(),
                ack: ack_tx,
            })
            .map_err(|_| BrokerError::Closed)?;
        ack_rx.await.unwrap_or(Err(BrokerError::Closed))?;
        Ok(subscription)
    }

    /// Drop every listener; their subscriptions see end of stream.
    pub(crate) fn clear(&self) {
        self.fanout.clear();
    }
}

struct ControlTask<C: SubscribeConnector> {
    connector: C,
    fanout: Arc<Fanout>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    control_tx: mpsc::UnboundedSender<Control>,
    backoff: BackoffConfig,
    sink: Option<C::Sink>,
    reader_cancel: Option<CancellationToken>,
    generation: u64,
    failures: u32,
    ever_connected: bool,
    cancel: CancellationToken,
}

impl<C: SubscribeConnector> ControlTask<C> {
    async fn run(mut self) {
        loop {
            let next = tokio::select! {
                () = self.cancel.cancelled() => None,
                msg = self.control_rx.recv() => msg,
            };
            let Some(msg) = next else {
                debug!("subscribe control task stopped");
                self.discard_connection();
                return;
            };

            match msg {
                Control::Subscribe { channel, ack } => {
                    let result = self.subscribe(&channel).await;
                    let _ = ack.send(result);
                }
                Control::Unsubscribe { channel } => self.unsubscribe(&channel).await,
                Control::Reconnect { generation } if generation == self.generation => {
                    warn!("subscribe connection lost");
                    self.discard_connection();
                    self.resubscribe_until_connected().await;
                }
                Control::Reconnect { .. } => {}
            }
        }
    }

    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        match self.try_subscribe(channel).await {
            Err(err) if err.is_transient() => {
                warn!(channel, error = %err, "subscribe failed, retrying on a fresh connection");
                self.discard_connection();
                let retried = self.try_subscribe(channel).await;
                if retried.is_err() && self.sink.is_none() {
                    // Other listeners lost their connection along with this one.
                    let _ = self.control_tx.send(Control::Reconnect {
                        generation: self.generation,
                    });
                }
                retried
            }
            other => other,
        }
    }

    async fn try_subscribe(&mut self, channel: &str) -> Result<()> {
        if self.sink.is_none() {
            // A fresh connection subscribes every listened channel, this one included.
            return self.connect().await;
        }
        let sink = self.sink.as_mut().ok_or(BrokerError::Closed)?;
        sink.subscribe(channel).await?;
        debug!(channel, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) {
        if self.fanout.has_listeners(channel) {
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        match sink.unsubscribe(channel).await {
            Ok(()) => debug!(channel, "unsubscribed"),
            Err(err) => warn!(channel, error = %err, "unsubscribe failed"),
        }
    }

    /// Forget the current connection and stop its reader, so a stale
    /// stream cannot deliver alongside its replacement.
    fn discard_connection(&mut self) {
        self.sink = None;
        if let Some(reader) = self.reader_cancel.take() {
            reader.cancel();
        }
    }

    async fn resubscribe_until_connected(&mut self) {
        while self.sink.is_none() && !self.fanout.is_empty() && !self.cancel.is_cancelled() {
            if let Err(err) = self.connect().await {
                warn!(attempt = self.failures, error = %err, "subscribe reconnect failed");
            }
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.failures > 0 {
            let delay = self.backoff.delay(self.failures - 1, rand::random());
            tokio::select! {
                () = self.cancel.cancelled() => return Err(BrokerError::Closed),
                () = tokio::time::sleep(delay) => {}
            }
        }

        match self.open().await {
            Ok((sink, stream)) => {
                self.generation += 1;
                let reader_cancel = self.cancel.child_token();
                let _ = tokio::spawn(read_messages(
                    stream,
                    self.fanout.clone(),
                    self.control_tx.clone(),
                    self.generation,
                    reader_cancel.clone(),
                ));
                self.reader_cancel = Some(reader_cancel);
                if self.ever_connected {
                    metrics::counter!(BROKER_RECONNECTS_TOTAL, "connection" => "subscribe")
                        .increment(1);
                    info!(
                        after_failures = self.failures,
                        channels = self.fanout.channels().len(),
                        "subscribe connection re-established"
                    );
                }
                self.sink = Some(sink);
                self.failures = 0;
                self.ever_connected = true;
                Ok(())
            }
            Err(err) => {
                self.failures = self.failures.saturating_add(1);
                Err(err)
            }
        }
    }

    async fn open(&mut self) -> Result<(C::Sink, MessageStream)> {
        let (mut sink, stream) = self.connector.open().await?;
        for channel in self.fanout.channels() {
            sink.subscribe(&channel).await?;
        }
        Ok((sink, stream))
    }
}

async fn read_messages(
    mut stream: MessageStream,
    fanout: Arc<Fanout>,
    control: mpsc::UnboundedSender<Control>,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            msg = stream.next() => msg,
        };
        let Some((channel, payload)) = msg else {
            let _ = control.send(Control::Reconnect { generation });
            return;
        };
        let _ = fanout.dispatch(&channel, &payload);
    }
}
