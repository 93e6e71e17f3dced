//! # Larder Sync Protocol
//!
//! Wire types exchanged between a Larder client and the sync server.
//!
//! This crate provides:
//! - [`SyncRequest`] / [`SyncResponse`], the single batched push/pull call
//! - Per entity type [`PushRequest`] / [`PushResult`] and [`PullRequest`] / [`PullResult`]
//! - [`PushStatus`] outcomes, including the `server_version` conflict outcome
//! - CBOR encoding/decoding and structural validation of responses
//!
//! Entity payloads travel as JSON values tagged by their entity type. They are
//! decoded into typed domain payloads by the client's sync adapters, never
//! trusted implicitly.
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod messages;
mod status;

pub use entity::{PullEntity, PushEntity, ServerVersionData};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    PullRequest, PullResult, PushEntityResult, PushRequest, PushResult, SyncRequest, SyncResponse,
};
pub use status::{PushStatus, Winner};
