//! Error types for protocol encoding and validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced while encoding, decoding or validating messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The message could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The bytes are not a valid message.
    #[error("decode error: {0}")]
    Decode(String),

    /// The message decoded but violates the protocol.
    #[error("invalid message: {0}")]
    Invalid(String),
}

impl ProtocolError {
    /// Creates an invalid-message error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
