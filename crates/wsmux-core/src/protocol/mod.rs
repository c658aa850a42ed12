//! Protocol modules (frames, inbound decoding, outbound envelopes).
//!
//! - Frames: transport-neutral text/binary units exchanged with a socket.
//! - Inbound: best-effort decoding of frames into structured messages.
//! - Outbound: the chat envelope and the heartbeat probe.
//!
//! Inbound decoding is total: any frame either decodes, is wrapped as a raw
//! message, or is recognised as a control marker and dropped.

pub mod frame;
pub mod inbound;
pub mod outbound;

pub use frame::Frame;
pub use inbound::{decode_inbound, InboundMessage, RAW_TYPE};
pub use outbound::{heartbeat_probe, iso_now, ChatPayload, MessageKind, OutboundEnvelope};
