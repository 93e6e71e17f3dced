//! CLI command implementations.

pub mod checkpoint;
pub mod inspect;
pub mod pending;
pub mod purge;

use larder_storage::FileDocumentStore;
use larder_sync_engine::{EntityStore, LocalStore, SyncAdapter, SyncResult};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Adapter over raw JSON payloads for any entity type.
///
/// The CLI never interprets payloads, so it works with whatever entity types
/// an app has stored.
pub struct JsonAdapter {
    entity_type: String,
}

impl SyncAdapter for JsonAdapter {
    type Payload = Value;
    type Patch = Value;

    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn apply_patch(&self, payload: &mut Value, patch: Value) {
        match (payload.as_object_mut(), patch) {
            (Some(fields), Value::Object(changes)) => fields.extend(changes),
            (_, patch) => *payload = patch,
        }
    }

    fn from_wire(&self, data: &Value) -> SyncResult<Value> {
        Ok(data.clone())
    }
}

/// Opens the store directory, taking its lock.
pub fn open_local(path: &Path) -> Result<Arc<LocalStore>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let backend = FileDocumentStore::open(path)?;
    Ok(Arc::new(LocalStore::new(Arc::new(backend))))
}

/// Returns an untyped entity store for one entity type.
pub fn json_store(local: Arc<LocalStore>, entity_type: &str) -> EntityStore<JsonAdapter> {
    EntityStore::new(
        local,
        Arc::new(JsonAdapter {
            entity_type: entity_type.to_string(),
        }),
    )
}
