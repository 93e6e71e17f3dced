//! Purge tombstones command implementation.

use super::{json_store, open_local};
use chrono::{Duration, Utc};
use std::path::Path;
use tracing::info;

/// Removes confirmed tombstones older than `older_than_days`.
pub fn run(
    path: &Path,
    entity_type: &str,
    scope_id: &str,
    older_than_days: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = json_store(open_local(path)?, entity_type);
    let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));

    let purged = store.purge_confirmed_tombstones(scope_id, cutoff)?;
    info!(entity_type, scope_id, purged, "purged tombstones");
    println!("Purged {purged} tombstone(s)");
    Ok(())
}
