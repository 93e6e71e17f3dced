//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The document key cannot be mapped to a storage location.
    #[error("invalid document key: {0:?}")]
    InvalidKey(String),

    /// Another process holds the storage directory.
    #[error("storage directory is locked by another process: {0}")]
    Locked(String),

    /// A write was rejected by the backend.
    #[error("write rejected: {0}")]
    WriteRejected(String),
}
