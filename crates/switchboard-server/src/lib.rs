//! # switchboard-server
//!
//! Session relay and its Axum surface.
//!
//! - `GET /sse` opens a push stream; this process becomes the session's
//!   [`ConnectionOwner`]
//! - `POST /message?sessionId=<id>` reaches the owner wherever it lives:
//!   directly when owned here, otherwise over the broker via [`Relay`]
//! - Replay of serialized calls into the local [`ProtocolHandler`]
//! - Health, Prometheus metrics, and graceful shutdown that releases every
//!   owned session

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod errors;
pub mod handler;
pub mod health;
pub mod local;
pub mod metrics;
pub mod owner;
pub mod relay;
pub mod replay;
pub mod server;
pub mod shutdown;
pub mod sse;

pub use config::RelayConfig;
pub use context::{CORRELATION_HEADER, RelayContext};
pub use errors::ApiError;
pub use handler::{
    HandlerError, HandlerResult, ProtocolHandler, SessionEvent, SessionHandle, SharedHandler,
};
pub use owner::{CloseReason, ConnectionOwner};
pub use relay::Relay;
pub use replay::{HttpReplay, Replayed, RequestReplay};
pub use server::{AppState, SwitchboardServer};
pub use shutdown::ShutdownCoordinator;
