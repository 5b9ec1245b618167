//! Settings type definitions.
//!
//! All types use camelCase JSON field names and `#[serde(default)]`, so a
//! partial settings file only needs the keys it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_core::backoff::BackoffConfig;

use crate::errors::{Result, SettingsError};

/// Root settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    /// HTTP surface.
    pub server: ServerSettings,
    /// Relay timing and handler policy.
    pub relay: RelaySettings,
    /// Shared broker connection.
    pub broker: BrokerSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl SwitchboardSettings {
    /// Reject combinations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.relay.response_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.responseTimeoutMs must be greater than zero".into(),
            ));
        }
        if self.relay.session_ttl_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.sessionTtlSecs must be greater than zero".into(),
            ));
        }
        if self.relay.termination_margin_secs >= self.relay.platform_max_duration_secs {
            return Err(SettingsError::InvalidValue(format!(
                "relay.terminationMarginSecs ({}) must be below relay.platformMaxDurationSecs ({})",
                self.relay.termination_margin_secs, self.relay.platform_max_duration_secs
            )));
        }
        if self.broker.kind == BrokerKind::Redis && self.broker.url.is_empty() {
            return Err(SettingsError::InvalidValue(
                "broker.url is required for the redis broker".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP surface settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Interval between SSE keep-alive comments, in seconds.
    pub keep_alive_secs: u64,
    /// Largest accepted POST body, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            keep_alive_secs: 15,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Relay timing and handler policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// How long an inbound relay waits for the owner's response.
    pub response_timeout_ms: u64,
    /// Expiry of registry records and liveness counters.
    pub session_ttl_secs: u64,
    /// Hard execution ceiling imposed by the hosting platform.
    pub platform_max_duration_secs: u64,
    /// How far ahead of the ceiling the push connection closes itself.
    pub termination_margin_secs: u64,
    /// Queue handler invocations per session instead of running them concurrently.
    pub serialize_handlers: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            response_timeout_ms: 10_000,
            session_ttl_secs: 30 * 60,
            platform_max_duration_secs: 800,
            termination_margin_secs: 5,
            serialize_handlers: false,
        }
    }
}

impl RelaySettings {
    /// Response wait bound.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Registry and counter expiry.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Lifetime of one push connection before it closes itself.
    #[must_use]
    pub fn max_connection_duration(&self) -> Duration {
        Duration::from_secs(
            self.platform_max_duration_secs
                .saturating_sub(self.termination_margin_secs),
        )
    }
}

/// Which broker implementation backs the relay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// In-process broker; correct only for a single instance.
    #[default]
    Memory,
    /// Shared Redis pub/sub and key/value store.
    Redis,
}

/// Shared broker connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Broker implementation.
    pub kind: BrokerKind,
    /// Connection URL for the redis broker.
    pub url: String,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
