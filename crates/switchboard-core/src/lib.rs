//! # switchboard-core
//!
//! Foundation types shared by every switchboard crate:
//!
//! - **Branded IDs**: [`SessionId`], [`RequestId`], [`CorrelationId`] as newtypes
//! - **Wire records**: [`SerializedRequest`], [`RelayResponse`], [`SessionRecord`]
//!   exchanged over the broker as JSON
//! - **Channel naming**: the bit-exact broker channel and key names
//! - **Errors**: [`RelayError`] taxonomy with HTTP status mapping
//! - **Backoff**: reconnect delay math
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod backoff;
pub mod channels;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod wire;

pub use errors::{RelayError, Result};
pub use ids::{CorrelationId, RequestId, SessionId};
pub use wire::{HeaderBytes, RelayResponse, SerializedRequest, SessionMetadata, SessionRecord};
