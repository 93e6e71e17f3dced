//! The persisted per (entity type, scope) document and the write path
//! shared by the entity store and the checkpoint store.
//!
//! Document layout (JSON):
//!
//! ```text
//! {
//!   "items": [ <record>, ... ],
//!   "lastSyncTime": "2024-05-01T10:00:00Z",   // optional
//!   "lastPulledVersion": 42                    // optional
//! }
//! ```

use crate::change_feed::{ChangeFeed, ChangeKind, StoreEvent};
use crate::clock::{Clock, SystemClock};
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use larder_storage::DocumentStore;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Checks that an entity type can prefix a document key.
///
/// Keys are split at their first `.`, so an entity type must be non-empty
/// and must not contain one. Scope ids may.
pub fn validate_entity_type(entity_type: &str) -> SyncResult<()> {
    if entity_type.is_empty() || entity_type.contains('.') {
        return Err(SyncError::InvalidEntityType(entity_type.to_string()));
    }
    Ok(())
}

/// Returns the storage key of the document for an entity type and scope.
pub fn document_key(entity_type: &str, scope_id: &str) -> SyncResult<String> {
    validate_entity_type(entity_type)?;
    Ok(format!("{entity_type}.{scope_id}"))
}

/// One persisted collection: its records plus the checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "R: serde::de::DeserializeOwned"))]
pub struct CollectionDocument<R> {
    /// Records, including tombstones.
    #[serde(default)]
    pub items: Vec<R>,
    /// Server time of the last successful pull.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Server checkpoint of the last successful pull.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pulled_version: Option<u64>,
}

impl<R> Default for CollectionDocument<R> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            last_sync_time: None,
            last_pulled_version: None,
        }
    }
}

/// A read-modify-write over one document.
///
/// Changes recorded here are published on the change feed only after the
/// document has been written successfully.
pub(crate) struct Transaction<R> {
    pub(crate) doc: CollectionDocument<R>,
    changes: Vec<(String, ChangeKind)>,
    dirty: bool,
}

impl<R> Transaction<R> {
    /// Records a change to publish and marks the document for writing.
    pub(crate) fn record_change(&mut self, record_id: &str, kind: ChangeKind) {
        self.changes.push((record_id.to_string(), kind));
        self.dirty = true;
    }

    /// Marks the document for writing without publishing anything.
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Local persistence shared by every entity store and the checkpoint store.
///
/// Each document has its own lock, held only for the duration of a single
/// read-modify-write; it is never held across network I/O.
pub struct LocalStore {
    backend: Arc<dyn DocumentStore>,
    feed: ChangeFeed,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalStore {
    /// Creates a local store using the system clock.
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    /// Creates a local store with a custom clock.
    pub fn with_clock(backend: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            feed: ChangeFeed::new(),
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to committed changes of every collection.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.feed.subscribe()
    }

    /// Returns the current local time.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns the storage backend.
    pub fn backend(&self) -> &Arc<dyn DocumentStore> {
        &self.backend
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Reads a document; a missing document reads as empty.
    pub fn load<R: DeserializeOwned>(
        &self,
        entity_type: &str,
        scope_id: &str,
    ) -> SyncResult<CollectionDocument<R>> {
        let key = document_key(entity_type, scope_id)?;
        self.read_document(&key)
    }

    fn read_document<R: DeserializeOwned>(&self, key: &str) -> SyncResult<CollectionDocument<R>> {
        match self.backend.read(key)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(CollectionDocument::default()),
        }
    }

    /// Runs `f` against a freshly read document and writes it back if `f`
    /// changed it. Either the whole document is written or nothing is.
    pub(crate) fn transact<R, T, F>(&self, entity_type: &str, scope_id: &str, f: F) -> SyncResult<T>
    where
        R: Serialize + DeserializeOwned,
        F: FnOnce(&mut Transaction<R>) -> SyncResult<T>,
    {
        let key = document_key(entity_type, scope_id)?;
        let lock = self.key_lock(&key);
        let _guard = lock.lock();

        let mut txn = Transaction {
            doc: self.read_document(&key)?,
            changes: Vec::new(),
            dirty: false,
        };
        let output = f(&mut txn)?;

        if txn.dirty {
            let bytes = serde_json::to_vec(&txn.doc)?;
            self.backend.write(&key, &bytes)?;
            for (record_id, kind) in &txn.changes {
                self.feed.emit(entity_type, scope_id, record_id, *kind);
            }
        }
        Ok(output)
    }
}
