//! Server-side entity tables.

use chrono::{DateTime, Utc};
use larder_sync_protocol::{
    PullEntity, PullRequest, PullResult, PushEntity, PushEntityResult, PushStatus,
    ServerVersionData,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// The server's copy of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    /// Entity payload.
    pub data: Value,
    /// Authoritative version.
    pub version: u64,
    /// Time of the last accepted write.
    pub updated_at: DateTime<Utc>,
    /// Client edit time reported by the last writer.
    pub client_updated_at: Option<DateTime<Utc>>,
    /// Deletion time.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Change sequence of the last accepted write.
    pub sequence: u64,
}

impl EntityRow {
    fn server_version_data(&self) -> ServerVersionData {
        ServerVersionData {
            data: self.data.clone(),
            version: self.version,
            updated_at: self.updated_at,
            client_updated_at: self.client_updated_at,
        }
    }
}

type TableKey = (String, String);

#[derive(Default)]
struct Tables {
    rows: HashMap<TableKey, HashMap<String, EntityRow>>,
    sequence: u64,
}

/// Entity tables keyed by (scope, entity type).
///
/// The change sequence is shared by all tables and only ever grows; it is
/// the pull checkpoint handed to clients.
#[derive(Default)]
pub struct ServerStore {
    tables: RwLock<Tables>,
}

fn table_key(scope_id: &str, entity_type: &str) -> TableKey {
    (scope_id.to_string(), entity_type.to_string())
}

impl ServerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last assigned change sequence.
    pub fn sequence(&self) -> u64 {
        self.tables.read().sequence
    }

    /// Returns a row, deleted or not.
    pub fn row(&self, scope_id: &str, entity_type: &str, entity_id: &str) -> Option<EntityRow> {
        self.tables
            .read()
            .rows
            .get(&table_key(scope_id, entity_type))
            .and_then(|table| table.get(entity_id))
            .cloned()
    }

    /// Returns the number of live rows in a table.
    pub fn live_count(&self, scope_id: &str, entity_type: &str) -> usize {
        self.tables
            .read()
            .rows
            .get(&table_key(scope_id, entity_type))
            .map(|table| table.values().filter(|row| row.deleted_at.is_none()).count())
            .unwrap_or(0)
    }

    /// Applies pushed entities and returns one result per entity.
    pub fn push(
        &self,
        scope_id: &str,
        entity_type: &str,
        entities: &[PushEntity],
        now: DateTime<Utc>,
    ) -> Vec<PushEntityResult> {
        let mut guard = self.tables.write();
        let Tables { rows, sequence } = &mut *guard;
        let table = rows.entry(table_key(scope_id, entity_type)).or_default();

        let mut results = Vec::with_capacity(entities.len());
        for entity in entities {
            let id = entity.entity_id.as_str();
            let result = match table.get_mut(id) {
                None if entity.pending_delete => PushEntityResult::deleted(id),
                None => {
                    *sequence += 1;
                    table.insert(
                        id.to_string(),
                        EntityRow {
                            data: entity.data.clone(),
                            version: entity.version,
                            updated_at: now,
                            client_updated_at: Some(entity.client_updated_at),
                            deleted_at: None,
                            sequence: *sequence,
                        },
                    );
                    PushEntityResult::accepted(id, PushStatus::Created, entity.version)
                }
                Some(row) if row.deleted_at.is_some() => PushEntityResult::deleted(id),
                Some(row) if entity.pending_delete => {
                    *sequence += 1;
                    row.deleted_at = Some(now);
                    row.version = row.version.max(entity.version);
                    row.updated_at = now;
                    row.sequence = *sequence;
                    PushEntityResult::deleted(id)
                }
                Some(row) if entity.version <= row.version => {
                    PushEntityResult::conflict(id, row.server_version_data())
                }
                Some(row) => {
                    *sequence += 1;
                    row.data = entity.data.clone();
                    row.version = entity.version;
                    row.updated_at = now;
                    row.client_updated_at = Some(entity.client_updated_at);
                    row.sequence = *sequence;
                    PushEntityResult::accepted(id, PushStatus::Updated, entity.version)
                }
            };
            results.push(result);
        }
        results
    }

    /// Returns what changed in a table after the request's checkpoint.
    ///
    /// Without a checkpoint, rows updated at or after `since` are returned,
    /// or everything if `since` is absent too.
    pub fn pull(&self, scope_id: &str, request: &PullRequest, limit: usize) -> PullResult {
        let tables = self.tables.read();
        let after = request.checkpoint.unwrap_or(0);

        let mut changed: Vec<(&String, &EntityRow)> = tables
            .rows
            .get(&table_key(scope_id, &request.entity_type))
            .map(|table| {
                table
                    .iter()
                    .filter(|(_, row)| row.sequence > after)
                    .filter(|(_, row)| match (request.checkpoint, request.since) {
                        (None, Some(since)) => row.updated_at >= since,
                        _ => true,
                    })
                    .collect()
            })
            .unwrap_or_default();
        changed.sort_by_key(|(_, row)| row.sequence);
        changed.truncate(limit);

        let checkpoint = changed
            .last()
            .map(|(_, row)| row.sequence)
            .unwrap_or(after)
            .max(after);

        let mut result = PullResult {
            entity_type: request.entity_type.clone(),
            entities: Vec::new(),
            deleted_entity_ids: Vec::new(),
            checkpoint: Some(checkpoint),
        };
        for (id, row) in changed {
            if row.deleted_at.is_some() {
                if request.include_deleted {
                    result.deleted_entity_ids.push(id.clone());
                }
            } else {
                result.entities.push(PullEntity {
                    entity_id: id.clone(),
                    data: row.data.clone(),
                    version: row.version,
                    updated_at: row.updated_at,
                    client_updated_at: row.client_updated_at,
                });
            }
        }
        result
    }

    /// Writes an entity as another device would, bumping its version.
    ///
    /// Returns the new version.
    pub fn put(
        &self,
        scope_id: &str,
        entity_type: &str,
        entity_id: &str,
        data: Value,
        now: DateTime<Utc>,
    ) -> u64 {
        let mut guard = self.tables.write();
        let Tables { rows, sequence } = &mut *guard;
        *sequence += 1;
        let table = rows.entry(table_key(scope_id, entity_type)).or_default();
        let row = table.entry(entity_id.to_string()).or_insert_with(|| EntityRow {
            data: Value::Null,
            version: 0,
            updated_at: now,
            client_updated_at: None,
            deleted_at: None,
            sequence: 0,
        });
        row.data = data;
        row.version += 1;
        row.updated_at = now;
        row.client_updated_at = Some(now);
        row.deleted_at = None;
        row.sequence = *sequence;
        row.version
    }

    /// Deletes an entity as another device would.
    ///
    /// Returns false if there was no live row.
    pub fn delete(
        &self,
        scope_id: &str,
        entity_type: &str,
        entity_id: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let mut guard = self.tables.write();
        let Tables { rows, sequence } = &mut *guard;
        let Some(row) = rows
            .get_mut(&table_key(scope_id, entity_type))
            .and_then(|table| table.get_mut(entity_id))
            .filter(|row| row.deleted_at.is_none())
        else {
            return false;
        };
        *sequence += 1;
        row.deleted_at = Some(now);
        row.version += 1;
        row.updated_at = now;
        row.sequence = *sequence;
        true
    }
}
