//! Shared error type across wsmux crates.

use thiserror::Error;

use crate::channel::ChannelKey;

/// Stable error codes, safe to log and match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Routing configuration never became available.
    ConfigUnavailable,
    /// Channel key has no endpoint in the routing table.
    ResolutionFailure,
    /// Socket-level failure.
    Transport,
    /// Malformed frame or document.
    Decode,
    /// Send attempted while the channel is not connected.
    NotReady,
    /// Invalid input or configuration value.
    BadRequest,
    /// Unsupported config version.
    UnsupportedVersion,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and state snapshots.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ConfigUnavailable => "CONFIG_UNAVAILABLE",
            ErrorCode::ResolutionFailure => "RESOLUTION_FAILURE",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Decode => "DECODE",
            ErrorCode::NotReady => "NOT_READY",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, WsMuxError>;

/// Unified error type used by core and client.
#[derive(Debug, Error)]
pub enum WsMuxError {
    #[error("configuration unavailable: {0}")]
    ConfigUnavailable(String),
    #[error("no endpoint registered for channel {0}")]
    ResolutionFailure(ChannelKey),
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("channel {0} not ready")]
    NotReady(ChannelKey),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl WsMuxError {
    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            WsMuxError::ConfigUnavailable(_) => ErrorCode::ConfigUnavailable,
            WsMuxError::ResolutionFailure(_) => ErrorCode::ResolutionFailure,
            WsMuxError::Transport(_) => ErrorCode::Transport,
            WsMuxError::Decode(_) => ErrorCode::Decode,
            WsMuxError::NotReady(_) => ErrorCode::NotReady,
            WsMuxError::BadRequest(_) => ErrorCode::BadRequest,
            WsMuxError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            WsMuxError::Internal(_) => ErrorCode::Internal,
        }
    }
}
