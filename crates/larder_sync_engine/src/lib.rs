//! # Larder Sync Engine
//!
//! Offline store and sync engine for Larder.
//!
//! This crate provides:
//! - A generic entity store with pending flags and tombstones
//! - Per (entity type, scope) checkpoints kept next to the records
//! - A sync engine (idle → pushing → pulling → checkpoint advance)
//! - Server-wins conflict handling
//! - An orchestrator running every entity type with retry and coalescing
//! - A change feed for observing committed writes
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! The sync engine implements a **push-then-pull** model per entity type:
//! 1. Push every record with a pending flag
//! 2. Pull everything changed since the checkpoint, skipping records that
//!    still have unsent changes
//! 3. Advance the checkpoint
//!
//! Entity types plug in through a [`SyncAdapter`]; the push, pull and merge
//! logic is written once.
//!
//! ## Key Invariants
//!
//! - Local mutations never wait on the network
//! - The server is authoritative on conflict
//! - Results are applied to a freshly re-read store, never to a snapshot
//! - A failed cycle leaves pending flags and checkpoints untouched
//! - Versions never decrease

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod change_feed;
mod checkpoint;
mod clock;
mod config;
mod conflict;
mod document;
mod engine;
mod error;
mod http;
mod orchestrator;
mod record;
mod store;
mod transport;

pub use adapter::SyncAdapter;
pub use change_feed::{ChangeFeed, ChangeKind, StoreEvent};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RetryConfig, SyncConfig};
pub use conflict::{
    apply_pulled_deletion, apply_push_outcome, decide_pull, PullDecision, PushApplication,
    PushOutcome,
};
pub use document::{document_key, validate_entity_type, CollectionDocument, LocalStore};
pub use engine::{CycleReport, SyncEngine, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpRemoteClient, LoopbackClient, LoopbackServer, SYNC_PATH};
pub use orchestrator::{EntityOutcome, EntitySync, SyncOrchestrator, SyncReport, SyncTrigger};
pub use record::{Record, ServerState};
pub use store::EntityStore;
pub use transport::{MockRemoteClient, MockReply, RemoteSyncClient};
