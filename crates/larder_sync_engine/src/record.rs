//! The generic record shape tracked by the offline store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A locally stored record of one entity type within one scope.
///
/// # Pending flags
///
/// - `pending_create` dominates: updating a record the server has never seen
///   keeps it a create
/// - `pending_delete` overrides `pending_update`
/// - A `pending_create` record has no `server_updated_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<D> {
    /// Client-generated id, never reused.
    pub id: String,
    /// Owning scope; records never move between scopes.
    pub scope_id: String,
    /// Starts at 1, bumped on every local mutation, replaced by the server's
    /// value when a write is confirmed.
    pub version: u64,
    /// Time of the last local edit.
    pub client_updated_at: DateTime<Utc>,
    /// Time the server last confirmed this record.
    #[serde(default)]
    pub server_updated_at: Option<DateTime<Utc>>,
    /// Time this record was last reconciled with the server.
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Created locally, not yet acknowledged.
    #[serde(default)]
    pub pending_create: bool,
    /// Updated locally, not yet acknowledged.
    #[serde(default)]
    pub pending_update: bool,
    /// Deleted locally, not yet acknowledged.
    #[serde(default)]
    pub pending_delete: bool,
    /// Tombstone time.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Domain fields, opaque to the engine.
    pub payload: D,
}

/// Server-side state adopted wholesale by a record.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerState<D> {
    /// Authoritative payload.
    pub payload: D,
    /// Authoritative version.
    pub version: u64,
    /// Time the server stored this version.
    pub updated_at: DateTime<Utc>,
    /// Client edit time reported by the writer.
    pub client_updated_at: Option<DateTime<Utc>>,
}

impl<D> Record<D> {
    /// Creates a new local record awaiting its first push.
    pub fn new_local(
        id: impl Into<String>,
        scope_id: impl Into<String>,
        payload: D,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            scope_id: scope_id.into(),
            version: 1,
            client_updated_at: now,
            server_updated_at: None,
            last_synced_at: None,
            pending_create: true,
            pending_update: false,
            pending_delete: false,
            deleted_at: None,
            payload,
        }
    }

    /// Materializes a record the server sent and the client has never seen.
    pub fn from_server(
        id: impl Into<String>,
        scope_id: impl Into<String>,
        server: ServerState<D>,
        synced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            scope_id: scope_id.into(),
            version: server.version,
            client_updated_at: server.client_updated_at.unwrap_or(server.updated_at),
            server_updated_at: Some(server.updated_at),
            last_synced_at: Some(synced_at),
            pending_create: false,
            pending_update: false,
            pending_delete: false,
            deleted_at: None,
            payload: server.payload,
        }
    }

    /// Returns true if any pending flag is set.
    pub fn is_dirty(&self) -> bool {
        self.pending_create || self.pending_update || self.pending_delete
    }

    /// Returns true if the record is not tombstoned.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Returns true if the server has never acknowledged this record.
    pub fn never_synced(&self) -> bool {
        self.pending_create && self.last_synced_at.is_none()
    }

    /// Records a local edit.
    pub fn mark_updated(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.client_updated_at = now;
        if !self.pending_create {
            self.pending_update = true;
        }
    }

    /// Tombstones the record locally.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.client_updated_at = now;
        self.deleted_at = Some(now);
        self.pending_update = false;
        self.pending_delete = true;
    }

    /// Clears all pending flags.
    pub fn clear_pending(&mut self) {
        self.pending_create = false;
        self.pending_update = false;
        self.pending_delete = false;
    }

    /// Replaces payload, version and timestamps with the server's copy and
    /// drops any local changes.
    pub fn adopt_server(&mut self, server: ServerState<D>, synced_at: DateTime<Utc>) {
        self.payload = server.payload;
        self.version = server.version;
        self.server_updated_at = Some(server.updated_at);
        self.client_updated_at = server.client_updated_at.unwrap_or(server.updated_at);
        self.last_synced_at = Some(synced_at);
        self.deleted_at = None;
        self.clear_pending();
    }

    /// Marks the record deleted on the server's word.
    pub fn mark_deleted_by_server(&mut self, server_time: DateTime<Utc>) {
        self.deleted_at = Some(server_time);
        self.pending_update = false;
        self.pending_delete = false;
        self.last_synced_at = Some(server_time);
    }
}
