//! Document store trait definition.

use crate::error::StorageResult;

/// A keyed store of opaque documents.
///
/// # Invariants
///
/// - `write` replaces the full document or leaves the previous one intact
/// - `read` returns exactly the bytes of the last successful `write`
/// - `remove` of a missing key is not an error
/// - Implementations must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryDocumentStore`] - For testing
/// - [`super::FileDocumentStore`] - For persistent storage
pub trait DocumentStore: Send + Sync {
    /// Reads the document stored under `key`.
    ///
    /// Returns `None` if no document has been written for the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically overwrites the document stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document could not be made durable. In that
    /// case the previous document is still readable.
    fn write(&self, key: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Removes the document stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Lists all keys with a stored document, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the keys cannot be enumerated.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        (**self).write(key, bytes)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        (**self).keys()
    }
}
