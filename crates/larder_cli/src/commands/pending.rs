//! Pending command implementation.

use super::{json_store, open_local};
use chrono::{DateTime, Utc};
use larder_sync_engine::Record;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// One record waiting to be pushed.
#[derive(Debug, Serialize, PartialEq)]
pub struct PendingRecord {
    /// Record id.
    pub id: String,
    /// `create`, `update` or `delete`.
    pub operation: &'static str,
    /// Local version.
    pub version: u64,
    /// Time of the last local edit.
    pub client_updated_at: DateTime<Utc>,
}

impl PendingRecord {
    fn from_record(record: &Record<Value>) -> Self {
        let operation = if record.pending_delete {
            "delete"
        } else if record.pending_create {
            "create"
        } else {
            "update"
        };
        Self {
            id: record.id.clone(),
            operation,
            version: record.version,
            client_updated_at: record.client_updated_at,
        }
    }
}

/// Runs the pending command.
pub fn run(
    path: &Path,
    entity_type: &str,
    scope_id: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = json_store(open_local(path)?, entity_type);
    let pending: Vec<PendingRecord> = store
        .dirty_records(scope_id)?
        .iter()
        .map(PendingRecord::from_record)
        .collect();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(());
    }

    if pending.is_empty() {
        println!("No pending changes for {entity_type} in {scope_id}");
        return Ok(());
    }

    println!("Pending {entity_type} in {scope_id}:");
    for record in &pending {
        println!(
            "  {:<6} {} (v{}, edited {})",
            record.operation,
            record.id,
            record.version,
            record.client_updated_at.to_rfc3339()
        );
    }
    Ok(())
}
