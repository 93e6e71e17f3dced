//! Per (entity type, scope) pull cursors.

use crate::document::LocalStore;
use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// How far pulls have progressed for one entity type in one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Scope id.
    pub scope_id: String,
    /// Entity type name.
    pub entity_type: String,
    /// Server time of the last successful sync.
    pub last_sync_time: DateTime<Utc>,
    /// Server checkpoint returned by the last pull.
    pub last_pulled_version: Option<u64>,
}

/// Reads and advances checkpoints.
///
/// Checkpoints live in the same document as the records they describe, so
/// advancing one never disturbs records and vice versa.
#[derive(Clone)]
pub struct CheckpointStore {
    local: Arc<LocalStore>,
}

impl CheckpointStore {
    /// Creates a checkpoint store over the shared local store.
    pub fn new(local: Arc<LocalStore>) -> Self {
        Self { local }
    }

    /// Returns the checkpoint, or `None` if no pull has completed yet.
    pub fn get(&self, entity_type: &str, scope_id: &str) -> SyncResult<Option<Checkpoint>> {
        let doc = self.local.load::<Value>(entity_type, scope_id)?;
        Ok(doc.last_sync_time.map(|last_sync_time| Checkpoint {
            scope_id: scope_id.to_string(),
            entity_type: entity_type.to_string(),
            last_sync_time,
            last_pulled_version: doc.last_pulled_version,
        }))
    }

    /// Stores a new checkpoint.
    pub fn advance(&self, checkpoint: &Checkpoint) -> SyncResult<()> {
        self.local
            .transact::<Value, _, _>(&checkpoint.entity_type, &checkpoint.scope_id, |txn| {
                txn.doc.last_sync_time = Some(checkpoint.last_sync_time);
                txn.doc.last_pulled_version = checkpoint.last_pulled_version;
                txn.mark_dirty();
                Ok(())
            })
    }

    /// Forgets the checkpoint so the next pull is a full pull.
    pub fn reset(&self, entity_type: &str, scope_id: &str) -> SyncResult<()> {
        self.local
            .transact::<Value, _, _>(entity_type, scope_id, |txn| {
                if txn.doc.last_sync_time.is_some() || txn.doc.last_pulled_version.is_some() {
                    txn.doc.last_sync_time = None;
                    txn.doc.last_pulled_version = None;
                    txn.mark_dirty();
                }
                Ok(())
            })
    }
}
