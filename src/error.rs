//! Error types for playerwire.

use thiserror::Error;

use crate::buffer::BufferError;
use crate::protocol::{ErrorCode, FieldError};

/// Main error type for all playerwire operations.
#[derive(Debug, Error)]
pub enum PlayerWireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (invalid header, wrong flags, unexpected frame, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A frame could not be parsed; the byte stream is desynchronized.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// The connection is gone (peer closed, transport error, or teardown).
    #[error("Connection lost")]
    ConnectionLost,

    /// No response arrived before the call deadline.
    #[error("Call timed out")]
    TimedOut,

    /// No dispatch entry exists for the given API id.
    #[error("Unknown API id: {0}")]
    UnknownApi(u32),

    /// Shared-memory buffer exchange failed.
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// A field was missing or had an unexpected type.
    #[error("Field error: {0}")]
    Field(#[from] FieldError),

    /// The server answered with a non-zero return code.
    #[error("Remote error: {0:?}")]
    Remote(ErrorCode),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// A caller-supplied value was rejected before anything was sent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A raw-route push was attempted without an attached data channel.
    #[error("Data channel not open")]
    NoDataChannel,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// A blocking call was made from inside the async runtime.
    #[error("Blocking call from async context")]
    BlockingInRuntime,
}

impl PlayerWireError {
    /// Whether this error means the whole connection is unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlayerWireError::Io(_)
                | PlayerWireError::Protocol(_)
                | PlayerWireError::Malformed(_)
                | PlayerWireError::ConnectionLost
                | PlayerWireError::UnknownApi(_)
        )
    }
}

/// Result type alias using PlayerWireError.
pub type Result<T> = std::result::Result<T, PlayerWireError>;
