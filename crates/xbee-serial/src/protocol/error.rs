//! Protocol errors

use thiserror::Error;

/// Errors that can occur while encoding, decoding or exchanging frames
#[derive(Error, Debug)]
pub enum XbeeError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected to XBee")]
    NotConnected,

    #[error("Read timeout")]
    Timeout,

    #[error("Transport closed")]
    Closed,

    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Invalid frame length: {length}")]
    InvalidLength { length: usize },

    #[error("Frame does not start with the 0x7E delimiter")]
    MissingDelimiter,

    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XbeeError {
    /// Whether this error describes a malformed frame rather than a link failure.
    ///
    /// Decode errors drop the offending frame; the read pipeline keeps going.
    /// [`XbeeError::PayloadTooLarge`] is a caller error when building a frame;
    /// an oversized payload on the wire decodes to [`XbeeError::InvalidLength`].
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            XbeeError::UnknownFrameType(_)
                | XbeeError::ChecksumMismatch { .. }
                | XbeeError::InvalidLength { .. }
                | XbeeError::MissingDelimiter
                | XbeeError::Truncated { .. }
        )
    }
}

/// Result alias used throughout the protocol module
pub type Result<T> = std::result::Result<T, XbeeError>;
