//! wsmux client runtime.
//!
//! This crate wires the endpoint resolver, connection state store, transport,
//! and connection manager into a self-healing multiplexer of WebSocket
//! channels. It is consumed by the demo binary (`main.rs`), by UI layers, and
//! by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod manager;
pub mod resolver;
pub mod state;
pub mod transport;

pub use manager::{ConnectionManager, IdlePolicy, ManagerSettings, Subscription};
pub use resolver::EndpointResolver;
pub use state::{ConnectionState, ConnectionStatus, StatePatch, StateStore};
