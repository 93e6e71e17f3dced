//! Checkpoint commands.

use super::open_local;
use larder_sync_engine::CheckpointStore;
use std::path::Path;
use tracing::info;

/// Forgets the pull checkpoint for one entity type in one scope.
pub fn reset(
    path: &Path,
    entity_type: &str,
    scope_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let checkpoints = CheckpointStore::new(open_local(path)?);

    match checkpoints.get(entity_type, scope_id)? {
        Some(previous) => {
            checkpoints.reset(entity_type, scope_id)?;
            info!(
                entity_type,
                scope_id,
                last_sync_time = %previous.last_sync_time,
                "checkpoint reset"
            );
            println!("Checkpoint cleared; the next sync will pull everything");
        }
        None => println!("No checkpoint stored for {entity_type} in {scope_id}"),
    }
    Ok(())
}
