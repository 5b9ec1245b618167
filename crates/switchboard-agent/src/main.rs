//! # switchboard
//!
//! Session relay binary: loads settings, connects the broker, and serves
//! the push and relay endpoints until interrupted.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use switchboard_broker::{BrokerHandles, RedisBroker};
use switchboard_core::logging::{LogFormat, init_subscriber};
use switchboard_server::{Relay, RelayConfig, SwitchboardServer};
use switchboard_settings::{BrokerKind, BrokerSettings, SwitchboardSettings};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::demo::DemoHandler;

/// Switchboard session relay.
#[derive(Parser, Debug, Default)]
#[command(name = "switchboard", about = "Session relay for server-push RPC sessions")]
struct Cli {
    /// Settings file (default `~/.switchboard/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Broker implementation: `memory` or `redis`.
    #[arg(long, value_parser = parse_broker_kind)]
    broker: Option<BrokerKind>,

    /// Redis connection URL; implies `--broker redis`.
    #[arg(long)]
    redis_url: Option<String>,

    /// Run handler invocations for one session one at a time.
    #[arg(long)]
    serialize_handlers: bool,

    /// Default log filter (`RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

fn parse_broker_kind(value: &str) -> Result<BrokerKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "memory" => Ok(BrokerKind::Memory),
        "redis" => Ok(BrokerKind::Redis),
        other => Err(format!("unknown broker {other:?}, expected memory or redis")),
    }
}

impl Cli {
    /// Flags are the last settings layer.
    fn apply(&self, settings: &mut SwitchboardSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(kind) = self.broker {
            settings.broker.kind = kind;
        }
        if let Some(url) = &self.redis_url {
            settings.broker.url.clone_from(url);
            if self.broker.is_none() {
                settings.broker.kind = BrokerKind::Redis;
            }
        }
        if self.serialize_handlers {
            settings.relay.serialize_handlers = true;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

async fn connect_broker(settings: &BrokerSettings) -> Result<BrokerHandles> {
    match settings.kind {
        BrokerKind::Memory => {
            warn!("using the in-process broker; sessions are only reachable through this instance");
            Ok(BrokerHandles::memory())
        }
        BrokerKind::Redis => {
            let broker = RedisBroker::connect(&settings.url, settings.backoff.clone())
                .await
                .context("Failed to configure redis broker")?;
            Ok(BrokerHandles::new(Arc::new(broker)))
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                let _ = signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args
        .settings
        .clone()
        .unwrap_or_else(switchboard_settings::settings_path);
    let mut settings = switchboard_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    let metrics = switchboard_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let broker = connect_broker(&settings.broker).await?;

    let relay = Arc::new(Relay::new(
        RelayConfig::from(&settings),
        broker.clone(),
        Arc::new(DemoHandler),
    ));
    let server = SwitchboardServer::new(relay).with_metrics(metrics);

    let listener = TcpListener::bind((settings.server.host.as_str(), settings.server.port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                settings.server.host, settings.server.port
            )
        })?;

    let shutdown = server.shutdown().clone();
    let _signal = tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutting down");
        shutdown.shutdown();
    });

    info!(
        broker = broker.pubsub.kind(),
        response_timeout_ms = settings.relay.response_timeout_ms,
        max_connection_secs = RelayConfig::from(&settings).max_connection_duration.as_secs(),
        "switchboard starting"
    );
    server.serve(listener).await.context("Server failed")?;

    broker.pubsub.close().await;
    info!("shutdown complete");
    Ok(())
}
