//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Cancelling the token ends every open push stream and stops the HTTP
//! listener from accepting new connections. Locally owned sessions are then
//! closed so their liveness counts drop before the process exits.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::owner::CloseReason;
use crate::relay::Relay;

/// Default timeout for draining sessions before giving up.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates shutdown across the listener and every push stream.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then close every session `relay` owns.
    ///
    /// Waits up to `timeout` for the closes to finish; sessions still
    /// counted afterwards expire with their liveness key.
    pub async fn graceful_shutdown(&self, relay: &Relay, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            sessions = relay.local().len(),
            timeout_secs = timeout.as_secs(),
            "draining local sessions"
        );

        if tokio::time::timeout(timeout, relay.close_all(CloseReason::Shutdown))
            .await
            .is_err()
        {
            warn!("shutdown timed out after {timeout:?}, some sessions may still be counted");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use switchboard_broker::BrokerHandles;
    use tokio::sync::mpsc;

    use crate::config::RelayConfig;
    use crate::context::RelayContext;
    use crate::handler::{HandlerResult, ProtocolHandler, SessionHandle};

    struct Noop;

    #[async_trait::async_trait]
    impl ProtocolHandler for Noop {
        async fn handle(
            &self,
            _session: SessionHandle,
            _request: axum::http::Request<axum::body::Body>,
        ) -> HandlerResult {
            Ok(axum::http::Response::new(axum::body::Body::empty()))
        }
    }

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_sets_flag() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn multiple_tokens_all_cancelled() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[test]
    fn default_is_not_shutting_down() {
        let coord = ShutdownCoordinator::default();
        assert!(!coord.is_shutting_down());
    }

    #[tokio::test]
    async fn token_cancelled_future_resolves() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();

        let handle = tokio::spawn(async move {
            token.cancelled().await;
            true
        });

        coord.shutdown();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn graceful_shutdown_closes_local_sessions() {
        let relay = Arc::new(Relay::new(
            RelayConfig::default(),
            BrokerHandles::memory(),
            Arc::new(Noop),
        ));
        let (tx, _rx) = mpsc::channel(4);
        let owner = relay
            .open_session(&RelayContext::new(), Default::default(), tx)
            .await
            .unwrap();
        assert_eq!(relay.liveness().get(owner.session_id()).await.unwrap(), 1);

        let coord = ShutdownCoordinator::new();
        coord.graceful_shutdown(&relay, None).await;

        assert!(coord.is_shutting_down());
        assert!(owner.is_closed());
        assert!(relay.local().is_empty());
        assert_eq!(relay.liveness().get(owner.session_id()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn graceful_shutdown_with_no_sessions_returns() {
        let relay = Relay::new(RelayConfig::default(), BrokerHandles::memory(), Arc::new(Noop));
        let coord = ShutdownCoordinator::new();
        coord
            .graceful_shutdown(&relay, Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
    }
}
