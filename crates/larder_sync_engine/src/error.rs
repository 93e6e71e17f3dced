//! Error types for the sync engine.

use larder_storage::StorageError;
use larder_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the local store or during a sync cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error; no response was received.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The response was malformed or did not match the expected schema.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with `success: false`.
    #[error("server rejected sync: {0}")]
    ServerRejected(String),

    /// Reading or writing the local document failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The local document could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The request did not complete in time.
    #[error("sync request timed out")]
    Timeout,

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A cycle for the same entity type and scope is already running.
    #[error("sync cycle already in flight for {entity_type} in scope {scope}")]
    CycleInFlight {
        /// Entity type name.
        entity_type: String,
        /// Scope id.
        scope: String,
    },

    /// Not connected to the server.
    #[error("not connected to server")]
    NotConnected,

    /// An entity type was registered twice.
    #[error("entity type already registered: {0}")]
    DuplicateEntityType(String),

    /// An entity type name is empty or contains `.`.
    #[error("invalid entity type name: {0:?}")]
    InvalidEntityType(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerRejected(_) => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
