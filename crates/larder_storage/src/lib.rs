//! # Larder Storage
//!
//! Keyed document storage for the Larder offline store.
//!
//! Each entity type and scope pair is persisted as one opaque document.
//! Storage backends never interpret document bytes; the sync engine owns the
//! document format.
//!
//! ## Guarantees
//!
//! - `read` observes either the previous or the new document, never a torn write
//! - `write` replaces the whole document atomically
//! - Backends are `Send + Sync` and can be shared across threads
//!
//! ## Available Backends
//!
//! - [`InMemoryDocumentStore`] - For testing and ephemeral storage
//! - [`FileDocumentStore`] - One file per document under a locked directory
//!
//! ## Example
//!
//! ```rust
//! use larder_storage::{DocumentStore, InMemoryDocumentStore};
//!
//! let store = InMemoryDocumentStore::new();
//! store.write("items.home", b"{}").unwrap();
//! assert_eq!(store.read("items.home").unwrap(), Some(b"{}".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::DocumentStore;
pub use error::{StorageError, StorageResult};
pub use file::FileDocumentStore;
pub use memory::InMemoryDocumentStore;
