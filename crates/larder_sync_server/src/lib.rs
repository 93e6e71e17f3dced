//! # Larder Sync Server
//!
//! Reference sync server for Larder.
//!
//! This crate provides:
//! - The `/sync` request handler (batched push and pull per entity type)
//! - Per (scope, entity type) entity tables with a change sequence
//! - Server-wins conflict detection on stale pushes
//!
//! # Protocol
//!
//! For every push request the server compares the pushed version with the
//! stored one:
//! 1. Unknown entity: stored as `created` with the pushed version
//! 2. `pendingDelete`: recorded as `deleted`
//! 3. Pushed version not newer than the stored one: `server_version`, and
//!    the stored copy is returned for the client to adopt
//! 4. Otherwise: stored as `updated`
//!
//! Every accepted write takes the next value of the change sequence. Pull
//! requests return what changed after the client's checkpoint, and the
//! highest sequence returned becomes the new checkpoint.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod server;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::SyncServer;
pub use store::{EntityRow, ServerStore};
