//! Inspect command implementation.

use super::open_local;
use chrono::{DateTime, Utc};
use larder_sync_engine::{CollectionDocument, LocalStore, Record};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Number of live records across all collections.
    pub live_count: usize,
    /// Number of tombstones across all collections.
    pub tombstone_count: usize,
    /// Number of records with pending changes.
    pub pending_count: usize,
    /// Per collection statistics.
    pub collections: Vec<CollectionStats>,
}

/// Statistics for one (entity type, scope) document.
#[derive(Debug, Serialize, PartialEq)]
pub struct CollectionStats {
    /// Entity type.
    pub entity_type: String,
    /// Scope id.
    pub scope_id: String,
    /// Live records.
    pub live: usize,
    /// Tombstones, confirmed or not.
    pub tombstones: usize,
    /// Records awaiting a create.
    pub pending_create: usize,
    /// Records awaiting an update.
    pub pending_update: usize,
    /// Records awaiting a delete.
    pub pending_delete: usize,
    /// Server time of the last successful pull.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Server checkpoint of the last successful pull.
    pub last_pulled_version: Option<u64>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let local = open_local(path)?;
    let result = inspect(path, &local)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }

    Ok(())
}

/// Collects statistics for every document in the store.
pub fn inspect(path: &Path, local: &LocalStore) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut result = InspectResult {
        path: path.display().to_string(),
        live_count: 0,
        tombstone_count: 0,
        pending_count: 0,
        collections: Vec::new(),
    };

    for key in local.backend().keys()? {
        let Some((entity_type, scope_id)) = key.split_once('.') else {
            tracing::warn!(key = %key, "skipping document with unrecognized key");
            continue;
        };
        let doc: CollectionDocument<Record<Value>> = local.load(entity_type, scope_id)?;
        let stats = collection_stats(entity_type, scope_id, &doc);

        result.live_count += stats.live;
        result.tombstone_count += stats.tombstones;
        result.pending_count += doc.items.iter().filter(|r| r.is_dirty()).count();
        result.collections.push(stats);
    }

    Ok(result)
}

fn collection_stats(
    entity_type: &str,
    scope_id: &str,
    doc: &CollectionDocument<Record<Value>>,
) -> CollectionStats {
    let items = &doc.items;
    CollectionStats {
        entity_type: entity_type.to_string(),
        scope_id: scope_id.to_string(),
        live: items.iter().filter(|r| r.is_live()).count(),
        tombstones: items.iter().filter(|r| r.deleted_at.is_some()).count(),
        pending_create: items.iter().filter(|r| r.pending_create).count(),
        pending_update: items.iter().filter(|r| r.pending_update).count(),
        pending_delete: items.iter().filter(|r| r.pending_delete).count(),
        last_sync_time: doc.last_sync_time,
        last_pulled_version: doc.last_pulled_version,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Larder Store Inspection");
    println!("=======================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Records:");
    println!("  Live:       {}", result.live_count);
    println!("  Tombstones: {}", result.tombstone_count);
    println!("  Pending:    {}", result.pending_count);

    if result.collections.is_empty() {
        return;
    }

    println!();
    println!("Collections:");
    for col in &result.collections {
        let synced = col
            .last_sync_time
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
        println!(
            "  [{} / {}] {} live, {} tombstones, pending {}/{}/{} (create/update/delete)",
            col.entity_type,
            col.scope_id,
            col.live,
            col.tombstones,
            col.pending_create,
            col.pending_update,
            col.pending_delete
        );
        match col.last_pulled_version {
            Some(version) => println!("      last sync {synced}, checkpoint {version}"),
            None => println!("      last sync {synced}"),
        }
    }
}
