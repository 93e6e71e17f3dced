//! Merge rules for push results and pulled server state.
//!
//! These functions operate on a single record that has just been re-read
//! from the store. They never touch the network and never fail; the engine
//! decides what to persist based on the value they return.

use crate::record::{Record, ServerState};
use chrono::{DateTime, Utc};
use tracing::warn;

/// A push result decoded against the adapter's payload type.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome<D> {
    /// The server stored the write (`created` or `updated`).
    Accepted {
        /// Version assigned by the server, if any.
        server_version: Option<u64>,
    },
    /// The server recorded the deletion.
    Deleted,
    /// The server kept its own copy; it replaces the local record.
    ServerWins(ServerState<D>),
}

/// What applying a push outcome did to the local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushApplication {
    /// Pending flags were cleared.
    Confirmed,
    /// The tombstone is confirmed; it stays until GC.
    DeleteConfirmed,
    /// The server's copy was adopted.
    Conflicted,
    /// The record changed after it was pushed. The acknowledgement was
    /// recorded but the newer edit stays pending.
    Superseded,
    /// The record no longer exists locally.
    Missing,
}

impl PushApplication {
    /// Returns true if the record was modified.
    pub fn changed_record(self) -> bool {
        matches!(
            self,
            PushApplication::Confirmed
                | PushApplication::DeleteConfirmed
                | PushApplication::Conflicted
                | PushApplication::Superseded
        )
    }
}

/// Applies one push outcome to the freshly read record.
///
/// `pushed_version` is the version carried by the request. If the record has
/// moved on since then, a local edit arrived while the request was in
/// flight: its payload and version are kept and it stays pending, but the
/// server now knows the record, so it is no longer a pending create.
pub fn apply_push_outcome<D>(
    record: Option<&mut Record<D>>,
    pushed_version: u64,
    outcome: PushOutcome<D>,
    server_time: DateTime<Utc>,
) -> PushApplication {
    let Some(record) = record else {
        return PushApplication::Missing;
    };
    if record.version != pushed_version {
        acknowledge_superseded(record, &outcome, server_time);
        return PushApplication::Superseded;
    }

    match outcome {
        PushOutcome::Accepted { server_version } => {
            record.clear_pending();
            record.server_updated_at = Some(server_time);
            record.last_synced_at = Some(server_time);
            if let Some(version) = server_version {
                if version >= record.version {
                    record.version = version;
                } else {
                    warn!(
                        id = %record.id,
                        local = record.version,
                        server = version,
                        "server acknowledged a lower version; keeping local version"
                    );
                }
            }
            PushApplication::Confirmed
        }
        PushOutcome::Deleted => {
            record.clear_pending();
            if record.deleted_at.is_none() {
                record.deleted_at = Some(server_time);
            }
            record.last_synced_at = Some(server_time);
            PushApplication::DeleteConfirmed
        }
        PushOutcome::ServerWins(server) => {
            record.adopt_server(server, server_time);
            PushApplication::Conflicted
        }
    }
}

fn acknowledge_superseded<D>(
    record: &mut Record<D>,
    outcome: &PushOutcome<D>,
    server_time: DateTime<Utc>,
) {
    match outcome {
        PushOutcome::Deleted => {
            if !record.is_live() {
                record.clear_pending();
            }
        }
        PushOutcome::Accepted { .. } | PushOutcome::ServerWins(_) => {
            if record.pending_create {
                record.pending_create = false;
                record.pending_update = !record.pending_delete;
            }
            record.server_updated_at = Some(server_time);
        }
    }
    record.last_synced_at = Some(server_time);
}

/// How a pulled entity is merged into the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullDecision {
    /// No local record; materialize one.
    Insert,
    /// Clean local record; replace it with the server copy.
    Overwrite,
    /// The local record has unsent changes; leave it for the push phase.
    SkipPending,
    /// The server copy is older than the local record.
    SkipStale,
}

/// Decides how to merge a pulled entity with version `incoming_version`.
///
/// Equal versions overwrite, so re-pulling the same range is harmless.
pub fn decide_pull<D>(local: Option<&Record<D>>, incoming_version: u64) -> PullDecision {
    match local {
        None => PullDecision::Insert,
        Some(record) if record.is_dirty() => PullDecision::SkipPending,
        Some(record) if incoming_version < record.version => PullDecision::SkipStale,
        Some(_) => PullDecision::Overwrite,
    }
}

/// Applies a server-side deletion to a local record.
///
/// Returns false when nothing changed: records the server has never seen
/// are left alone, as are tombstones already confirmed.
pub fn apply_pulled_deletion<D>(record: &mut Record<D>, server_time: DateTime<Utc>) -> bool {
    if record.pending_create {
        return false;
    }
    if record.deleted_at.is_some() && !record.is_dirty() {
        return false;
    }
    record.mark_deleted_by_server(server_time);
    true
}
