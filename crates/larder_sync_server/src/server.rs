//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::ServerStore;
use chrono::{DateTime, Utc};
use larder_sync_protocol::{PushResult, SyncRequest, SyncResponse};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The sync server.
///
/// This server answers the single batched `/sync` call: every push request
/// in a message is applied before any pull request is answered, so a pull
/// sees the writes pushed alongside it.
///
/// # Example
///
/// ```
/// use larder_sync_server::{SyncServer, ServerConfig};
///
/// let server = SyncServer::new(ServerConfig::default());
///
/// // In a real application, an HTTP endpoint passes request bodies to
/// // server.handle_bytes() and writes back the result.
/// ```
pub struct SyncServer {
    config: ServerConfig,
    store: Arc<ServerStore>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(ServerStore::new()))
    }

    /// Creates a sync server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<ServerStore>) -> Self {
        Self { config, store }
    }

    /// Returns the entity store.
    pub fn store(&self) -> &Arc<ServerStore> {
        &self.store
    }

    /// Handles a sync request.
    ///
    /// Failures are reported in the response with `success: false`.
    pub fn handle(&self, request: &SyncRequest) -> SyncResponse {
        let now = Utc::now();
        match self.try_handle(request, now) {
            Ok(response) => response,
            Err(e) => {
                if e.is_client_error() {
                    warn!(scope = %request.scope_id, device = %request.device_id, error = %e, "sync request rejected");
                } else {
                    error!(scope = %request.scope_id, device = %request.device_id, error = %e, "sync request failed");
                }
                SyncResponse::error(now, e.to_string())
            }
        }
    }

    fn try_handle(&self, request: &SyncRequest, now: DateTime<Utc>) -> ServerResult<SyncResponse> {
        if request.scope_id.is_empty() {
            return Err(ServerError::InvalidRequest("missing scope id".into()));
        }
        let mut seen = HashSet::new();
        for push in &request.push_requests {
            if !seen.insert(push.entity_type.as_str()) {
                return Err(ServerError::InvalidRequest(format!(
                    "duplicate push request for {}",
                    push.entity_type
                )));
            }
            if push.entities.len() > self.config.max_push_batch {
                return Err(ServerError::BatchTooLarge {
                    size: push.entities.len(),
                    max: self.config.max_push_batch,
                });
            }
        }

        let mut response = SyncResponse::success(now);
        for push in &request.push_requests {
            let results = self
                .store
                .push(&request.scope_id, &push.entity_type, &push.entities, now);
            debug!(
                scope = %request.scope_id,
                entity_type = %push.entity_type,
                count = results.len(),
                "push applied"
            );
            response.push_results.push(PushResult {
                entity_type: push.entity_type.clone(),
                results,
            });
        }
        for pull in &request.pull_requests {
            let result = self
                .store
                .pull(&request.scope_id, pull, self.config.max_pull_batch);
            debug!(
                scope = %request.scope_id,
                entity_type = %pull.entity_type,
                entities = result.entities.len(),
                deleted = result.deleted_entity_ids.len(),
                "pull answered"
            );
            response.pull_results.push(result);
        }
        Ok(response)
    }

    /// Handles a CBOR-encoded request body and returns the encoded response.
    ///
    /// An undecodable body is a transport-level failure and yields `Err`;
    /// everything else is answered with a response.
    pub fn handle_bytes(&self, body: &[u8]) -> Result<Vec<u8>, String> {
        let request = SyncRequest::decode(body).map_err(|e| {
            let e = ServerError::from(e);
            warn!(error = %e, "undecodable sync body");
            e.to_string()
        })?;
        self.handle(&request)
            .encode()
            .map_err(|e| ServerError::Internal(format!("encoding response: {e}")))
            .map_err(|e| {
                error!(error = %e, "sync response dropped");
                e.to_string()
            })
    }

    /// Writes an entity as another device would. Returns the new version.
    pub fn apply_remote_update(
        &self,
        scope_id: &str,
        entity_type: &str,
        entity_id: &str,
        data: Value,
    ) -> u64 {
        self.store
            .put(scope_id, entity_type, entity_id, data, Utc::now())
    }

    /// Deletes an entity as another device would.
    pub fn apply_remote_delete(&self, scope_id: &str, entity_type: &str, entity_id: &str) -> bool {
        self.store
            .delete(scope_id, entity_type, entity_id, Utc::now())
    }

    /// Returns the number of live entities in a table.
    pub fn entity_count(&self, scope_id: &str, entity_type: &str) -> usize {
        self.store.live_count(scope_id, entity_type)
    }
}
