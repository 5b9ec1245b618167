//! Broker error types.

use switchboard_core::RelayError;
use thiserror::Error;

/// Errors raised by broker adapters.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The connection could not be established or was lost mid-command.
    /// A fresh connection may succeed.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// The broker rejected or could not execute a command.
    #[error("broker command failed: {0}")]
    Command(String),

    /// A stored value did not have the expected shape.
    #[error("invalid value under {key}: {reason}")]
    InvalidValue {
        /// Key that held the value.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The adapter was closed.
    #[error("broker is closed")]
    Closed,
}

impl BrokerError {
    /// Whether retrying on a freshly created connection may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            Self::Connection(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

impl From<BrokerError> for RelayError {
    fn from(err: BrokerError) -> Self {
        RelayError::Broker(err.to_string())
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
