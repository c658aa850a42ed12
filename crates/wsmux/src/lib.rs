//! Top-level facade crate for wsmux.
//!
//! Re-exports the protocol types and the client runtime so users can depend on a single crate.

pub mod core {
    pub use wsmux_core::*;
}

pub mod client {
    pub use wsmux_client::*;
}

pub use wsmux_client::{ConnectionManager, ManagerSettings, Subscription};
pub use wsmux_core::ChannelKey;
