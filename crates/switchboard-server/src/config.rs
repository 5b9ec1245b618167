//! Runtime configuration for the relay.

use std::time::Duration;

use switchboard_settings::SwitchboardSettings;

/// Timing and policy knobs the relay reads on every call.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// How long an inbound relay waits for the owner's response.
    pub response_timeout: Duration,
    /// Expiry of registry records and liveness counters.
    pub session_ttl: Duration,
    /// Lifetime of a push connection before it closes itself.
    pub max_connection_duration: Duration,
    /// Interval between SSE keep-alive comments.
    pub keep_alive: Duration,
    /// Largest body accepted or relayed, in bytes.
    pub max_body_bytes: usize,
    /// Queue handler invocations per session in arrival order.
    pub serialize_handlers: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from(&SwitchboardSettings::default())
    }
}

impl From<&SwitchboardSettings> for RelayConfig {
    fn from(settings: &SwitchboardSettings) -> Self {
        Self {
            response_timeout: settings.relay.response_timeout(),
            session_ttl: settings.relay.session_ttl(),
            max_connection_duration: settings.relay.max_connection_duration(),
            keep_alive: Duration::from_secs(settings.server.keep_alive_secs),
            max_body_bytes: settings.server.max_body_bytes,
            serialize_handlers: settings.relay.serialize_handlers,
        }
    }
}
