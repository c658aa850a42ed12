//! wsmux core: channel keys, wire envelopes, inbound decoding, and errors.
//!
//! This crate defines the wire-level contracts and error surface shared by the
//! client runtime and its consumers. It carries no transport or runtime
//! dependencies so UI layers and test doubles can depend on it alone.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Malformed frames and configuration surface as `WsMuxError`/`Result` or as
//! wrapped raw messages, never as a crash in the host process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod channel;
pub mod error;
pub mod protocol;

pub use channel::ChannelKey;
/// Shared result type.
pub use error::{ErrorCode, Result, WsMuxError};
