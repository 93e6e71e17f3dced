//! Errors raised while answering sync requests.

use larder_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Why a sync request could not be answered.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The request is well formed but cannot be served.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request body could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Too many entities in one push.
    #[error("push batch too large: {size} > {max}")]
    BatchTooLarge {
        /// Entities in the request.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The server failed while answering a valid request.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if the client sent something the server refuses.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::Protocol(_)
                | ServerError::BatchTooLarge { .. }
        )
    }

    /// Returns true if the failure is the server's own.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }
}
