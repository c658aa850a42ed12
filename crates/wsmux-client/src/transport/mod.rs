//! Transport layer (WebSocket client).
//!
//! The manager talks to sockets only through [`Connector`] and [`Transport`],
//! so the real tungstenite client and the in-memory double are
//! interchangeable. The double is built only with the `test-util` feature.

#[cfg(feature = "test-util")]
pub mod memory;
pub mod ws;

use async_trait::async_trait;

use wsmux_core::error::Result;
use wsmux_core::protocol::Frame;

#[cfg(feature = "test-util")]
pub use memory::MemoryConnector;
pub use ws::TungsteniteConnector;

/// Opens physical connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

/// One open connection.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Next data frame. `None` once the peer closed; `Some(Err)` on a socket
    /// error. Must be cancel-safe.
    async fn recv(&mut self) -> Option<Result<Frame>>;

    /// Best-effort close handshake.
    async fn close(&mut self);
}
