//! Generic per entity type sync engine.

use crate::adapter::SyncAdapter;
use crate::change_feed::ChangeKind;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::{RetryConfig, SyncConfig};
use crate::conflict::{
    apply_pulled_deletion, apply_push_outcome, decide_pull, PullDecision, PushApplication,
    PushOutcome,
};
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::EntitySync;
use crate::record::{Record, ServerState};
use crate::store::EntityStore;
use crate::transport::RemoteSyncClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use larder_sync_protocol::{
    PullRequest, PushEntity, PushEntityResult, PushRequest, PushStatus, SyncRequest, SyncResponse,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The phase a cycle is in for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle is running.
    Idle,
    /// Sending local changes.
    Pushing,
    /// Fetching server changes.
    Pulling,
    /// Storing the new checkpoint and collecting tombstones.
    CheckpointAdvance,
}

impl SyncState {
    /// Returns true if a cycle is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncState::Idle)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of sync cycles that failed.
    pub cycles_failed: u64,
    /// Total number of records pushed.
    pub records_pushed: u64,
    /// Total number of records received from pulls.
    pub records_pulled: u64,
    /// Total number of conflicts resolved in the server's favour.
    pub conflicts: u64,
    /// Server time of the last completed cycle.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Records sent to the server.
    pub pushed: usize,
    /// Pushed records the server confirmed.
    pub confirmed: usize,
    /// Pushed records replaced by the server's copy.
    pub conflicts: usize,
    /// Pushed records edited again while the request was in flight.
    pub superseded: usize,
    /// Entities received from the pull.
    pub pulled: usize,
    /// Pulled entities inserted or overwritten locally.
    pub applied: usize,
    /// Pulled entities skipped because the local record is pending.
    pub skipped_pending: usize,
    /// Pulled entities older than the local record.
    pub stale: usize,
    /// Server deletions applied locally.
    pub deletions: usize,
    /// Confirmed tombstones removed.
    pub purged: usize,
    /// Checkpoint after the cycle.
    pub checkpoint: Option<Checkpoint>,
    /// Server time of the pull response.
    pub server_timestamp: Option<DateTime<Utc>>,
}

/// A running cycle: its phase and whether it was asked to stop.
#[derive(Debug, Clone, Copy)]
struct ActiveCycle {
    state: SyncState,
    cancelled: bool,
}

type ActiveCycles = RwLock<HashMap<String, ActiveCycle>>;

/// Resets the scope's state to idle when a cycle ends, including when the
/// cycle's future is dropped mid-flight. A pending cancel request ends with
/// it.
struct CycleGuard<'a> {
    states: &'a ActiveCycles,
    scope: String,
}

impl CycleGuard<'_> {
    fn set(&self, state: SyncState) {
        if let Some(cycle) = self.states.write().get_mut(&self.scope) {
            cycle.state = state;
        }
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.states.read().get(&self.scope).is_some_and(|c| c.cancelled) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.states.write().remove(&self.scope);
    }
}

/// Synchronizes one entity type with the server.
///
/// A cycle pushes every pending record, then pulls everything changed since
/// the checkpoint, then advances the checkpoint. No store lock is held while
/// a request is in flight: the affected document is re-read right before
/// each phase's results are applied, and a push result is only applied to a
/// record that still carries the version that was pushed.
///
/// Any failure aborts the cycle and leaves pending flags and the checkpoint
/// as they were, so the same work is retried by the next cycle.
pub struct SyncEngine<A: SyncAdapter, C: RemoteSyncClient> {
    config: SyncConfig,
    store: EntityStore<A>,
    checkpoints: CheckpointStore,
    client: Arc<C>,
    states: ActiveCycles,
    stats: RwLock<SyncStats>,
}

impl<A: SyncAdapter, C: RemoteSyncClient> SyncEngine<A, C> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, store: EntityStore<A>, client: Arc<C>) -> Self {
        let checkpoints = CheckpointStore::new(Arc::clone(store.local()));
        Self {
            config,
            store,
            checkpoints,
            client,
            states: RwLock::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the entity type name.
    pub fn entity_type(&self) -> &str {
        self.store.entity_type()
    }

    /// Returns the entity store.
    pub fn store(&self) -> &EntityStore<A> {
        &self.store
    }

    /// Returns the checkpoint store.
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current state for a scope.
    pub fn state(&self, scope_id: &str) -> SyncState {
        self.states
            .read()
            .get(scope_id)
            .map_or(SyncState::Idle, |cycle| cycle.state)
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Stops the cycle running for `scope_id` at its next phase boundary.
    ///
    /// Returns false if no cycle is running for the scope; nothing is
    /// remembered for later cycles, and other scopes are unaffected.
    pub fn cancel(&self, scope_id: &str) -> bool {
        match self.states.write().get_mut(scope_id) {
            Some(cycle) => {
                cycle.cancelled = true;
                true
            }
            None => false,
        }
    }

    fn begin(&self, scope_id: &str) -> SyncResult<CycleGuard<'_>> {
        let mut states = self.states.write();
        if states.get(scope_id).is_some_and(|cycle| cycle.state.is_active()) {
            return Err(SyncError::CycleInFlight {
                entity_type: self.entity_type().to_string(),
                scope: scope_id.to_string(),
            });
        }
        states.insert(
            scope_id.to_string(),
            ActiveCycle {
                state: SyncState::Pushing,
                cancelled: false,
            },
        );
        Ok(CycleGuard {
            states: &self.states,
            scope: scope_id.to_string(),
        })
    }

    /// Runs one full cycle for a scope: push, pull, checkpoint advance.
    ///
    /// # Errors
    ///
    /// Returns `CycleInFlight` if a cycle for this scope is already running,
    /// `Cancelled` if [`cancel`](Self::cancel) was called for the scope while
    /// the cycle ran, and otherwise
    /// whatever transport, protocol or storage error aborted the cycle.
    pub async fn sync_cycle(&self, scope_id: &str) -> SyncResult<CycleReport> {
        let guard = self.begin(scope_id)?;

        let result = self.run_cycle(scope_id, &guard).await;
        drop(guard);

        let mut stats = self.stats.write();
        match &result {
            Ok(report) => {
                stats.cycles_completed += 1;
                stats.records_pushed += report.pushed as u64;
                stats.records_pulled += report.pulled as u64;
                stats.conflicts += report.conflicts as u64;
                stats.last_sync_time = report.server_timestamp;
                stats.last_error = None;
                info!(
                    entity_type = self.entity_type(),
                    scope = scope_id,
                    pushed = report.pushed,
                    conflicts = report.conflicts,
                    pulled = report.pulled,
                    purged = report.purged,
                    "sync cycle completed"
                );
            }
            Err(e) => {
                stats.cycles_failed += 1;
                stats.last_error = Some(e.to_string());
                warn!(
                    entity_type = self.entity_type(),
                    scope = scope_id,
                    error = %e,
                    "sync cycle aborted"
                );
            }
        }
        result
    }

    async fn run_cycle(&self, scope_id: &str, guard: &CycleGuard<'_>) -> SyncResult<CycleReport> {
        let mut report = CycleReport::default();
        let previous = self.checkpoints.get(self.entity_type(), scope_id)?;

        self.push_phase(scope_id, guard, previous.as_ref(), &mut report)
            .await?;
        guard.check_cancelled()?;

        guard.set(SyncState::Pulling);
        let response = self.pull_phase(scope_id, previous.as_ref(), &mut report).await?;
        guard.check_cancelled()?;

        guard.set(SyncState::CheckpointAdvance);
        self.advance_checkpoint(scope_id, previous, &response, &mut report)?;
        report.purged = self.collect_tombstones(scope_id)?;

        Ok(report)
    }

    /// Sends a request with the configured timeout and checks the response.
    async fn send(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        let response = tokio::time::timeout(self.config.request_timeout, self.client.sync(request))
            .await
            .map_err(|_| SyncError::Timeout)??;
        response.validate()?;
        if !response.success {
            return Err(SyncError::ServerRejected(
                response
                    .error
                    .unwrap_or_else(|| "sync failed without a message".into()),
            ));
        }
        Ok(response)
    }

    fn to_push_entity(&self, record: &Record<A::Payload>) -> SyncResult<PushEntity> {
        Ok(PushEntity {
            entity_id: record.id.clone(),
            scope_id: record.scope_id.clone(),
            data: self.store.adapter().to_wire(&record.payload)?,
            version: record.version,
            client_updated_at: record.client_updated_at,
            pending_create: record.pending_create,
            pending_delete: record.pending_delete,
        })
    }

    fn decode_outcome(&self, result: &PushEntityResult) -> SyncResult<PushOutcome<A::Payload>> {
        match result.status {
            PushStatus::Created | PushStatus::Updated => Ok(PushOutcome::Accepted {
                server_version: result.server_version,
            }),
            PushStatus::Deleted => Ok(PushOutcome::Deleted),
            PushStatus::ServerVersion => {
                let server = result.server_version_data.as_ref().ok_or_else(|| {
                    SyncError::Protocol(format!(
                        "server_version outcome for {} without server data",
                        result.entity_id
                    ))
                })?;
                Ok(PushOutcome::ServerWins(ServerState {
                    payload: self.store.adapter().from_wire(&server.data)?,
                    version: server.version,
                    updated_at: server.updated_at,
                    client_updated_at: server.client_updated_at,
                }))
            }
        }
    }

    async fn push_phase(
        &self,
        scope_id: &str,
        guard: &CycleGuard<'_>,
        checkpoint: Option<&Checkpoint>,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        let dirty = self.store.dirty_records(scope_id)?;
        if dirty.is_empty() {
            debug!(entity_type = self.entity_type(), scope = scope_id, "nothing to push");
            return Ok(());
        }

        for chunk in dirty.chunks(self.config.push_batch_size.max(1)) {
            guard.check_cancelled()?;

            let entities = chunk
                .iter()
                .map(|record| self.to_push_entity(record))
                .collect::<SyncResult<Vec<_>>>()?;
            let pushed_versions: HashMap<&str, u64> = chunk
                .iter()
                .map(|record| (record.id.as_str(), record.version))
                .collect();

            let request = SyncRequest::new(scope_id, self.config.device_id.clone()).with_push(
                PushRequest {
                    entity_type: self.entity_type().to_string(),
                    entities,
                    last_pulled_at: checkpoint.map(|c| c.last_sync_time),
                    checkpoint: checkpoint.and_then(|c| c.last_pulled_version),
                },
            );
            debug!(
                entity_type = self.entity_type(),
                scope = scope_id,
                count = chunk.len(),
                "pushing"
            );
            let response = self.send(&request).await?;

            let push_result = response.push_result(self.entity_type()).ok_or_else(|| {
                SyncError::Protocol(format!("no push result for {}", self.entity_type()))
            })?;

            // Decode everything before touching the store so a bad payload
            // leaves the whole chunk pending.
            let mut outcomes = Vec::with_capacity(push_result.results.len());
            for result in &push_result.results {
                let Some(&pushed_version) = pushed_versions.get(result.entity_id.as_str()) else {
                    warn!(id = %result.entity_id, "push result for an entity that was not pushed");
                    continue;
                };
                outcomes.push((
                    result.entity_id.clone(),
                    pushed_version,
                    self.decode_outcome(result)?,
                ));
            }

            report.pushed += chunk.len();
            self.apply_push_results(scope_id, outcomes, response.server_timestamp, report)?;
        }
        Ok(())
    }

    fn apply_push_results(
        &self,
        scope_id: &str,
        outcomes: Vec<(String, u64, PushOutcome<A::Payload>)>,
        server_time: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        self.store
            .local()
            .transact(self.entity_type(), scope_id, |txn| {
                for (id, pushed_version, outcome) in outcomes {
                    let record = txn
                        .doc
                        .items
                        .iter_mut()
                        .find(|r: &&mut Record<A::Payload>| r.id == id);
                    let applied = apply_push_outcome(record, pushed_version, outcome, server_time);
                    if applied.changed_record() {
                        txn.mark_dirty();
                    }
                    match applied {
                        PushApplication::Confirmed | PushApplication::DeleteConfirmed => {
                            report.confirmed += 1;
                            txn.record_change(&id, ChangeKind::Confirmed);
                        }
                        PushApplication::Conflicted => {
                            report.conflicts += 1;
                            txn.record_change(&id, ChangeKind::Conflicted);
                        }
                        PushApplication::Superseded => {
                            report.superseded += 1;
                            debug!(id = %id, "record changed during push; keeping local edit");
                        }
                        PushApplication::Missing => {
                            debug!(id = %id, "pushed record no longer exists locally");
                        }
                    }
                }
                Ok(())
            })
    }

    async fn pull_phase(
        &self,
        scope_id: &str,
        checkpoint: Option<&Checkpoint>,
        report: &mut CycleReport,
    ) -> SyncResult<SyncResponse> {
        let request = SyncRequest::new(scope_id, self.config.device_id.clone()).with_pull(
            PullRequest::new(
                self.entity_type(),
                checkpoint.map(|c| c.last_sync_time),
                checkpoint.and_then(|c| c.last_pulled_version),
            ),
        );
        let response = self.send(&request).await?;

        let pull_result = response.pull_result(self.entity_type()).ok_or_else(|| {
            SyncError::Protocol(format!("no pull result for {}", self.entity_type()))
        })?;

        let mut pulled = Vec::with_capacity(pull_result.entities.len());
        for entity in &pull_result.entities {
            pulled.push((
                entity.entity_id.clone(),
                ServerState {
                    payload: self.store.adapter().from_wire(&entity.data)?,
                    version: entity.version,
                    updated_at: entity.updated_at,
                    client_updated_at: entity.client_updated_at,
                },
            ));
        }
        report.pulled = pulled.len();

        let server_time = response.server_timestamp;
        let deleted_ids = &pull_result.deleted_entity_ids;
        self.store
            .local()
            .transact(self.entity_type(), scope_id, |txn| {
                for (id, state) in pulled {
                    let index = txn
                        .doc
                        .items
                        .iter()
                        .position(|r: &Record<A::Payload>| r.id == id);
                    match decide_pull(index.map(|i| &txn.doc.items[i]), state.version) {
                        PullDecision::Insert => {
                            txn.doc
                                .items
                                .push(Record::from_server(id.clone(), scope_id, state, server_time));
                            report.applied += 1;
                            txn.record_change(&id, ChangeKind::Pulled);
                        }
                        PullDecision::Overwrite => {
                            if let Some(i) = index {
                                txn.doc.items[i].adopt_server(state, server_time);
                                report.applied += 1;
                                txn.record_change(&id, ChangeKind::Pulled);
                            }
                        }
                        PullDecision::SkipPending => report.skipped_pending += 1,
                        PullDecision::SkipStale => report.stale += 1,
                    }
                }

                for id in deleted_ids {
                    let Some(record) = txn
                        .doc
                        .items
                        .iter_mut()
                        .find(|r: &&mut Record<A::Payload>| &r.id == id)
                    else {
                        continue;
                    };
                    if apply_pulled_deletion(record, server_time) {
                        report.deletions += 1;
                        txn.record_change(id, ChangeKind::Deleted);
                    }
                }
                Ok(())
            })?;

        debug!(
            entity_type = self.entity_type(),
            scope = scope_id,
            pulled = report.pulled,
            applied = report.applied,
            deletions = report.deletions,
            "pull applied"
        );
        Ok(response)
    }

    /// Stores the pull's checkpoint. An empty pull that did not move the
    /// server checkpoint leaves the stored checkpoint as it was.
    fn advance_checkpoint(
        &self,
        scope_id: &str,
        previous: Option<Checkpoint>,
        response: &SyncResponse,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        report.server_timestamp = Some(response.server_timestamp);
        let (returned, empty) = match response.pull_result(self.entity_type()) {
            Some(pull) => (
                pull.checkpoint,
                pull.entities.is_empty() && pull.deleted_entity_ids.is_empty(),
            ),
            None => (None, true),
        };

        if let Some(previous) = previous {
            let version = returned.or(previous.last_pulled_version);
            if empty && version == previous.last_pulled_version {
                report.checkpoint = Some(previous);
                return Ok(());
            }
            let next = Checkpoint {
                last_sync_time: response.server_timestamp,
                last_pulled_version: version,
                ..previous
            };
            self.checkpoints.advance(&next)?;
            report.checkpoint = Some(next);
            return Ok(());
        }

        let next = Checkpoint {
            scope_id: scope_id.to_string(),
            entity_type: self.entity_type().to_string(),
            last_sync_time: response.server_timestamp,
            last_pulled_version: returned,
        };
        self.checkpoints.advance(&next)?;
        report.checkpoint = Some(next);
        Ok(())
    }

    fn collect_tombstones(&self, scope_id: &str) -> SyncResult<usize> {
        let Some(retention) = self.config.tombstone_retention else {
            return Ok(0);
        };
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| self.store.local().now().checked_sub_signed(retention))
        else {
            return Ok(0);
        };
        self.store.purge_confirmed_tombstones(scope_id, cutoff)
    }
}

#[async_trait]
impl<A: SyncAdapter, C: RemoteSyncClient + 'static> EntitySync for SyncEngine<A, C> {
    fn entity_type(&self) -> &str {
        self.store.entity_type()
    }

    fn retry(&self) -> Option<&RetryConfig> {
        self.config.retry.as_ref()
    }

    async fn sync_cycle(&self, scope_id: &str) -> SyncResult<CycleReport> {
        SyncEngine::sync_cycle(self, scope_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::{Item, ItemAdapter, ItemPatch};
    use crate::clock::ManualClock;
    use crate::document::LocalStore;
    use crate::transport::MockRemoteClient;
    use chrono::TimeZone;
    use larder_storage::InMemoryDocumentStore;
    use larder_sync_protocol::{PullEntity, PullResult, PushResult, ServerVersionData};
    use serde_json::json;
    use std::time::Duration;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    struct Fixture {
        engine: SyncEngine<ItemAdapter, MockRemoteClient>,
        client: Arc<MockRemoteClient>,
        backend: Arc<InMemoryDocumentStore>,
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let backend = Arc::new(InMemoryDocumentStore::new());
        let clock = Arc::new(ManualClock::new(ts(1_000)));
        let local = Arc::new(LocalStore::with_clock(backend.clone(), clock));
        let store = EntityStore::new(local, Arc::new(ItemAdapter));
        let client = Arc::new(MockRemoteClient::new());
        Fixture {
            engine: SyncEngine::new(config, store, Arc::clone(&client)),
            client,
            backend,
        }
    }

    fn push_response(at: i64, results: Vec<PushEntityResult>) -> SyncResponse {
        let mut response = SyncResponse::success(ts(at));
        response.push_results.push(PushResult {
            entity_type: "items".into(),
            results,
        });
        response
    }

    fn pull_response(
        at: i64,
        entities: Vec<PullEntity>,
        deleted: Vec<&str>,
        checkpoint: Option<u64>,
    ) -> SyncResponse {
        let mut response = SyncResponse::success(ts(at));
        response.pull_results.push(PullResult {
            entity_type: "items".into(),
            entities,
            deleted_entity_ids: deleted.into_iter().map(String::from).collect(),
            checkpoint,
        });
        response
    }

    fn pull_entity(id: &str, name: &str, quantity: u32, version: u64) -> PullEntity {
        PullEntity {
            entity_id: id.into(),
            data: json!({"name": name, "quantity": quantity}),
            version,
            updated_at: ts(1_500),
            client_updated_at: None,
        }
    }

    #[tokio::test]
    async fn create_then_conflict_adopts_server_copy() {
        let f = fixture(SyncConfig::new("phone"));
        let store = f.engine.store().clone();
        let a = store.create("home", Item::new("rice", 1)).unwrap();

        f.client.push_response(push_response(
            2_000,
            vec![PushEntityResult::accepted(&a.id, PushStatus::Created, 1)],
        ));
        f.client.push_response(pull_response(2_000, vec![], vec![], Some(1)));
        f.engine.sync_cycle("home").await.unwrap();

        let synced = store.get_by_id("home", &a.id).unwrap().unwrap();
        assert_eq!(synced.version, 1);
        assert!(!synced.is_dirty());

        let edited = store
            .update("home", &a.id, ItemPatch::quantity(2))
            .unwrap()
            .unwrap();
        assert_eq!(edited.version, 2);
        assert!(edited.pending_update);

        f.client.push_response(push_response(
            3_000,
            vec![PushEntityResult::conflict(
                &a.id,
                ServerVersionData {
                    data: json!({"name": "rice", "quantity": 7}),
                    version: 3,
                    updated_at: ts(2_500),
                    client_updated_at: Some(ts(2_400)),
                },
            )],
        ));
        f.client.push_response(pull_response(3_000, vec![], vec![], Some(2)));
        let report = f.engine.sync_cycle("home").await.unwrap();

        assert_eq!(report.conflicts, 1);
        let resolved = store.get_by_id("home", &a.id).unwrap().unwrap();
        assert_eq!(resolved.version, 3);
        assert_eq!(resolved.payload, Item::new("rice", 7));
        assert_eq!(resolved.server_updated_at, Some(ts(2_500)));
        assert_eq!(resolved.client_updated_at, ts(2_400));
        assert!(!resolved.is_dirty());
    }

    #[tokio::test]
    async fn push_request_carries_record_fields_and_checkpoint() {
        let f = fixture(SyncConfig::new("phone"));
        let store = f.engine.store().clone();
        f.engine
            .checkpoints()
            .advance(&Checkpoint {
                scope_id: "home".into(),
                entity_type: "items".into(),
                last_sync_time: ts(900),
                last_pulled_version: Some(5),
            })
            .unwrap();
        let a = store.create("home", Item::new("rice", 1)).unwrap();

        f.client.push_response(push_response(2_000, vec![]));
        f.client.push_response(pull_response(2_000, vec![], vec![], Some(5)));
        f.engine.sync_cycle("home").await.unwrap();

        let requests = f.client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].device_id, "phone");
        let push = &requests[0].push_requests[0];
        assert_eq!(push.checkpoint, Some(5));
        assert_eq!(push.last_pulled_at, Some(ts(900)));
        assert_eq!(push.entities[0].entity_id, a.id);
        assert!(push.entities[0].pending_create);
        assert_eq!(push.entities[0].data, json!({"name": "rice", "quantity": 1}));

        let pull = &requests[1].pull_requests[0];
        assert_eq!(pull.since, Some(ts(900)));
        assert_eq!(pull.checkpoint, Some(5));
        assert!(pull.include_deleted);

        // No result for the record: it stays pending.
        assert!(store.get_by_id("home", &a.id).unwrap().unwrap().pending_create);
    }

    #[tokio::test]
    async fn push_is_chunked() {
        let f = fixture(SyncConfig::new("phone").with_push_batch_size(2));
        let store = f.engine.store().clone();
        let ids: Vec<_> = (0..5)
            .map(|i| store.create("home", Item::new("x", i)).unwrap().id)
            .collect();

        for chunk in ids.chunks(2) {
            let results = chunk
                .iter()
                .map(|id| PushEntityResult::accepted(id, PushStatus::Created, 1))
                .collect();
            f.client.push_response(push_response(2_000, results));
        }
        f.client.push_response(pull_response(2_000, vec![], vec![], Some(5)));

        let report = f.engine.sync_cycle("home").await.unwrap();
        assert_eq!(report.pushed, 5);
        assert_eq!(report.confirmed, 5);
        assert_eq!(f.client.requests().len(), 4);
        assert!(store.dirty_records("home").unwrap().is_empty());
    }

    #[tokio::test]
    async fn edit_during_push_is_not_lost() {
        let f = fixture(SyncConfig::new("phone"));
        let store = f.engine.store().clone();
        let a = store.create("home", Item::new("rice", 1)).unwrap();

        let racing = store.clone();
        let id = a.id.clone();
        f.client.on_request(move |request| {
            if !request.push_requests.is_empty() {
                racing
                    .update("home", &id, ItemPatch::quantity(9))
                    .unwrap();
            }
        });
        f.client.push_response(push_response(
            2_000,
            vec![PushEntityResult::accepted(&a.id, PushStatus::Created, 1)],
        ));
        f.client.push_response(pull_response(2_000, vec![], vec![], Some(1)));

        let report = f.engine.sync_cycle("home").await.unwrap();
        assert_eq!(report.superseded, 1);

        let record = store.get_by_id("home", &a.id).unwrap().unwrap();
        assert_eq!(record.payload.quantity, 9);
        assert_eq!(record.version, 2);
        assert!(!record.pending_create);
        assert!(record.pending_update);
        assert_eq!(record.server_updated_at, Some(ts(2_000)));

        // Deleting it now must reach the server as a delete.
        assert!(store.delete("home", &a.id).unwrap());
        let tombstone = &store.dirty_records("home").unwrap()[0];
        assert!(tombstone.pending_delete);
        assert_eq!(tombstone.version, 3);
    }

    #[tokio::test]
    async fn pull_merges_inserts_overwrites_and_skips() {
        let f = fixture(SyncConfig::new("phone"));
        let store = f.engine.store().clone();
        let local = store.create("home", Item::new("rice", 1)).unwrap();

        // Push leaves the record pending (no result), then the pull tries to
        // overwrite it.
        f.client.push_response(push_response(2_000, vec![]));
        f.client.push_response(pull_response(
            2_000,
            vec![
                pull_entity("remote", "salt", 3, 4),
                pull_entity(&local.id, "pepper", 8, 9),
            ],
            vec![],
            Some(10),
        ));
        let report = f.engine.sync_cycle("home").await.unwrap();

        assert_eq!(report.pulled, 2);
        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped_pending, 1);

        let remote = store.get_by_id("home", "remote").unwrap().unwrap();
        assert_eq!(remote.version, 4);
        assert_eq!(remote.payload, Item::new("salt", 3));
        assert!(!remote.is_dirty());
        assert_eq!(
            store.get_by_id("home", &local.id).unwrap().unwrap().payload,
            Item::new("rice", 1)
        );

        // A stale copy of "remote" is ignored, a newer one overwrites.
        f.client.push_response(push_response(3_000, vec![]));
        f.client.push_response(pull_response(
            3_000,
            vec![pull_entity("remote", "salt", 1, 2)],
            vec![],
            Some(11),
        ));
        let report = f.engine.sync_cycle("home").await.unwrap();
        assert_eq!(report.stale, 1);
        assert_eq!(store.get_by_id("home", "remote").unwrap().unwrap().version, 4);
    }

    #[tokio::test]
    async fn pulled_deletions_tombstone_records() {
        let f = fixture(SyncConfig::new("phone").with_tombstone_retention(None));
        let store = f.engine.store().clone();

        f.client.push_response(pull_response(
            2_000,
            vec![pull_entity("remote", "salt", 3, 1)],
            vec![],
            Some(1),
        ));
        f.engine.sync_cycle("home").await.unwrap();
        let pending = store.create("home", Item::new("rice", 1)).unwrap();

        f.client.push_response(push_response(3_000, vec![]));
        f.client.push_response(pull_response(
            3_000,
            vec![],
            vec!["remote", pending.id.as_str(), "unknown"],
            Some(2),
        ));
        let report = f.engine.sync_cycle("home").await.unwrap();

        assert_eq!(report.deletions, 1);
        assert!(store.get_by_id("home", "remote").unwrap().is_none());
        let all = store.get_all_for_sync("home").unwrap();
        let tombstone = all.iter().find(|r| r.id == "remote").unwrap();
        assert_eq!(tombstone.deleted_at, Some(ts(3_000)));
        assert!(store.get_by_id("home", &pending.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn failure_leaves_flags_and_checkpoint_untouched() {
        let f = fixture(SyncConfig::new("phone"));
        let store = f.engine.store().clone();
        let a = store.create("home", Item::new("rice", 1)).unwrap();

        f.client.push_failure("network unreachable");
        let err = f.engine.sync_cycle("home").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.engine.state("home"), SyncState::Idle);
        assert!(store.get_by_id("home", &a.id).unwrap().unwrap().pending_create);
        assert!(f.engine.checkpoints().get("items", "home").unwrap().is_none());

        // Push succeeds but the pull is rejected.
        f.client.push_response(push_response(
            2_000,
            vec![PushEntityResult::accepted(&a.id, PushStatus::Created, 1)],
        ));
        f.client.push_response(SyncResponse::error(ts(2_000), "maintenance"));
        let err = f.engine.sync_cycle("home").await.unwrap_err();
        assert!(matches!(err, SyncError::ServerRejected(ref m) if m == "maintenance"));
        assert!(f.engine.checkpoints().get("items", "home").unwrap().is_none());

        let stats = f.engine.stats();
        assert_eq!(stats.cycles_failed, 2);
        assert_eq!(stats.cycles_completed, 0);
        assert_eq!(stats.last_error.as_deref(), Some("server rejected sync: maintenance"));
    }

    #[tokio::test]
    async fn malformed_payload_aborts_before_applying() {
        let f = fixture(SyncConfig::new("phone"));
        f.client.push_response(pull_response(
            2_000,
            vec![
                pull_entity("good", "salt", 1, 1),
                PullEntity {
                    data: json!({"unexpected": true}),
                    ..pull_entity("bad", "x", 1, 1)
                },
            ],
            vec![],
            Some(2),
        ));

        let err = f.engine.sync_cycle("home").await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert!(f.engine.store().get_all("home").unwrap().is_empty());
        assert_eq!(f.backend.write_count(), 0);
    }

    #[tokio::test]
    async fn second_cycle_is_idempotent() {
        let f = fixture(SyncConfig::new("phone"));
        f.client.push_response(pull_response(
            2_000,
            vec![pull_entity("remote", "salt", 3, 1)],
            vec![],
            Some(1),
        ));
        let first = f.engine.sync_cycle("home").await.unwrap();

        f.client.push_response(pull_response(2_500, vec![], vec![], None));
        let second = f.engine.sync_cycle("home").await.unwrap();

        assert_eq!(second.checkpoint, first.checkpoint);
        assert_eq!(second.pushed, 0);
        assert!(f.engine.store().dirty_records("home").unwrap().is_empty());
        // Only the pull-only request was sent the second time.
        assert_eq!(f.client.requests().len(), 2);
    }

    #[tokio::test]
    async fn timeout_aborts_cycle() {
        struct Stalled;

        #[async_trait]
        impl RemoteSyncClient for Stalled {
            async fn sync(&self, _request: &SyncRequest) -> SyncResult<SyncResponse> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(SyncError::NotConnected)
            }
        }

        let local = Arc::new(LocalStore::new(Arc::new(InMemoryDocumentStore::new())));
        let store = EntityStore::new(local, Arc::new(ItemAdapter));
        let engine = SyncEngine::new(
            SyncConfig::new("phone").with_request_timeout(Duration::from_millis(10)),
            store,
            Arc::new(Stalled),
        );

        let err = engine.sync_cycle("home").await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout));
        assert_eq!(engine.state("home"), SyncState::Idle);
    }

    #[tokio::test]
    async fn cancelled_between_phases() {
        let f = fixture(SyncConfig::new("phone"));
        let store = f.engine.store().clone();
        let a = store.create("home", Item::new("rice", 1)).unwrap();

        let engine = Arc::new(f.engine);
        let cancelling = Arc::clone(&engine);
        f.client.on_request(move |_| {
            assert!(cancelling.cancel("home"));
        });
        f.client.push_response(push_response(
            2_000,
            vec![PushEntityResult::accepted(&a.id, PushStatus::Created, 1)],
        ));

        let err = engine.sync_cycle("home").await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        // The push result was applied in one write before cancelling.
        assert!(!store.get_by_id("home", &a.id).unwrap().unwrap().is_dirty());
        assert!(engine.checkpoints().get("items", "home").unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_is_scoped_to_the_running_cycle() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let f = fixture(SyncConfig::new("phone"));
        let store = f.engine.store().clone();
        let a = store.create("home", Item::new("rice", 1)).unwrap();
        let engine = Arc::new(f.engine);

        // No cycle is running, so nothing carries over to the next one.
        assert!(!engine.cancel("home"));

        let cancelling = Arc::clone(&engine);
        let other_scope_cancelled = Arc::new(AtomicBool::new(true));
        let seen = Arc::clone(&other_scope_cancelled);
        f.client.on_request(move |_| {
            seen.store(cancelling.cancel("cabin"), Ordering::SeqCst);
        });
        f.client.push_response(push_response(
            2_000,
            vec![PushEntityResult::accepted(&a.id, PushStatus::Created, 1)],
        ));
        f.client
            .push_response(pull_response(2_000, vec![], vec![], Some(1)));

        let report = engine.sync_cycle("home").await.unwrap();
        assert_eq!(report.confirmed, 1);
        assert!(!other_scope_cancelled.load(Ordering::SeqCst));
        assert_eq!(
            engine.checkpoints().get("items", "home").unwrap().and_then(|c| c.last_pulled_version),
            Some(1)
        );
    }

    #[tokio::test]
    async fn confirmed_tombstones_are_collected() {
        let f = fixture(SyncConfig::new("phone").with_tombstone_retention(Some(Duration::ZERO)));
        let store = f.engine.store().clone();

        f.client.push_response(pull_response(
            900,
            vec![pull_entity("remote", "salt", 3, 1)],
            vec![],
            Some(1),
        ));
        f.engine.sync_cycle("home").await.unwrap();
        store.delete("home", "remote").unwrap();

        f.client.push_response(push_response(
            950,
            vec![PushEntityResult::deleted("remote")],
        ));
        f.client.push_response(pull_response(950, vec![], vec![], Some(2)));
        let report = f.engine.sync_cycle("home").await.unwrap();

        assert_eq!(report.confirmed, 1);
        assert_eq!(report.purged, 1);
        assert!(store.get_all_for_sync("home").unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_events_are_published() {
        let f = fixture(SyncConfig::new("phone"));
        let store = f.engine.store().clone();
        let a = store.create("home", Item::new("rice", 1)).unwrap();
        let rx = store.local().subscribe();

        f.client.push_response(push_response(
            2_000,
            vec![PushEntityResult::accepted(&a.id, PushStatus::Created, 1)],
        ));
        f.client.push_response(pull_response(
            2_000,
            vec![pull_entity("remote", "salt", 3, 1)],
            vec![],
            Some(1),
        ));
        f.engine.sync_cycle("home").await.unwrap();

        let kinds: Vec<_> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Confirmed, ChangeKind::Pulled]);
    }
}
