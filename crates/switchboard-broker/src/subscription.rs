//! Channel subscriptions handed out by [`PubSub::subscribe`](crate::PubSub::subscribe).

use tokio::sync::mpsc;

/// One message received on a subscribed channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Channel the message arrived on.
    pub channel: String,
    /// Raw payload.
    pub payload: String,
}

type Release = Box<dyn FnOnce() + Send + Sync>;

/// A live subscription to one channel.
///
/// Messages are buffered until read. [`unsubscribe`](Self::unsubscribe) is
/// idempotent and runs automatically on drop, so a subscription held by a
/// future that gets cancelled is released with it.
pub struct Subscription {
    channel: String,
    messages: mpsc::UnboundedReceiver<Message>,
    release: Option<Release>,
}

impl Subscription {
    pub(crate) fn new<F>(channel: String, messages: mpsc::UnboundedReceiver<Message>, release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            channel,
            messages,
            release: Some(Box::new(release)),
        }
    }

    /// Channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether [`unsubscribe`](Self::unsubscribe) has not run yet.
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    /// Next message, or `None` once unsubscribed and drained, or when the
    /// adapter shut down.
    pub async fn recv(&mut self) -> Option<Message> {
        self.messages.recv().await
    }

    /// Stop listening. Safe to call any number of times.
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counted() -> (Subscription, Arc<AtomicUsize>, mpsc::UnboundedSender<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = releases.clone();
        let sub = Subscription::new("requests:abc".into(), rx, move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });
        (sub, releases, tx)
    }

    #[test]
    fn unsubscribe_runs_release_once() {
        let (mut sub, releases, _tx) = counted();
        sub.unsubscribe();
        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(!sub.is_active());
    }

    #[test]
    fn drop_releases() {
        let (sub, releases, _tx) = counted();
        drop(sub);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_after_unsubscribe_does_not_release_twice() {
        let (mut sub, releases, _tx) = counted();
        sub.unsubscribe();
        drop(sub);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recv_yields_buffered_messages() {
        let (mut sub, _releases, tx) = counted();
        tx.send(Message {
            channel: "requests:abc".into(),
            payload: "one".into(),
        })
        .unwrap();
        drop(tx);
        assert_eq!(sub.recv().await.unwrap().payload, "one");
        assert!(sub.recv().await.is_none());
    }
}
