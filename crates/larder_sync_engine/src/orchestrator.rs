//! Runs the sync engines of every registered entity type.

use crate::clock::{Clock, SystemClock};
use crate::config::{RetryConfig, SyncConfig};
use crate::document::validate_entity_type;
use crate::engine::CycleReport;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One entity type's sync cycle, independent of its payload type.
#[async_trait]
pub trait EntitySync: Send + Sync {
    /// Entity type name.
    fn entity_type(&self) -> &str;

    /// Backoff for this entity type, overriding the orchestrator's.
    fn retry(&self) -> Option<&RetryConfig> {
        None
    }

    /// Runs one push/pull/checkpoint cycle for a scope.
    async fn sync_cycle(&self, scope_id: &str) -> SyncResult<CycleReport>;
}

/// What caused a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Explicit request, e.g. pull-to-refresh.
    Manual,
    /// Connectivity came back.
    Reconnect,
    /// Periodic timer.
    Interval,
}

/// Result of one entity type within a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityOutcome {
    /// The cycle completed.
    Synced(CycleReport),
    /// The cycle failed; the next pass retries the same range.
    Failed(String),
    /// A cycle was already running; it will run once more when it ends.
    Coalesced,
}

/// Result of one pass over all registered entity types.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Scope that was synced.
    pub scope_id: String,
    /// What caused the pass.
    pub trigger: SyncTrigger,
    /// Per entity type outcomes, in registration order.
    pub outcomes: Vec<(String, EntityOutcome)>,
}

impl SyncReport {
    /// Returns the outcome for an entity type.
    pub fn outcome(&self, entity_type: &str) -> Option<&EntityOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == entity_type)
            .map(|(_, outcome)| outcome)
    }

    /// Returns the entity types that failed.
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, EntityOutcome::Failed(_)))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Returns true if no entity type failed.
    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }
}

type CycleKey = (String, String);

/// Running cycles, each with a flag set when another trigger asked for a
/// rerun.
type CycleTable = Mutex<HashMap<CycleKey, bool>>;

/// Claim on one running cycle. Dropping it releases the key.
struct InFlight<'a> {
    table: &'a CycleTable,
    key: CycleKey,
    released: bool,
}

impl<'a> InFlight<'a> {
    /// Claims `key`, or flags a rerun on the cycle already holding it.
    fn acquire(table: &'a CycleTable, key: CycleKey) -> Option<Self> {
        let mut cycles = table.lock();
        if let Some(rerun) = cycles.get_mut(&key) {
            *rerun = true;
            return None;
        }
        cycles.insert(key.clone(), false);
        Some(Self {
            table,
            key,
            released: false,
        })
    }

    /// Consumes a pending rerun request and returns true, or releases the
    /// key and returns false. Both happen under one lock, so a trigger is
    /// either seen here or acquires the key itself.
    fn rerun_or_release(&mut self) -> bool {
        let mut cycles = self.table.lock();
        match cycles.get_mut(&self.key) {
            Some(rerun) if *rerun => {
                *rerun = false;
                true
            }
            _ => {
                cycles.remove(&self.key);
                self.released = true;
                false
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.table.lock().remove(&self.key);
        }
    }
}

/// Drives sync for every registered entity type.
///
/// Entity types are synced sequentially in registration order. A failing
/// type is logged and reported, and never stops the types after it. At most
/// one cycle per (scope, entity type) runs at a time; a trigger arriving
/// while one is running makes it run once more instead of starting a second
/// concurrent cycle.
pub struct SyncOrchestrator {
    engines: RwLock<Vec<Arc<dyn EntitySync>>>,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
    in_flight: CycleTable,
    last_synced: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator with no registered entity types.
    pub fn new(retry: RetryConfig) -> Self {
        Self::with_clock(retry, Arc::new(SystemClock))
    }

    /// Creates an orchestrator with a custom clock for `last_synced_at`.
    pub fn with_clock(retry: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            engines: RwLock::new(Vec::new()),
            retry,
            clock,
            in_flight: Mutex::new(HashMap::new()),
            last_synced: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an entity type's engine.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEntityType` if the name cannot be used in a document
    /// key, or `DuplicateEntityType` if the type is already registered.
    pub fn register(&self, engine: Arc<dyn EntitySync>) -> SyncResult<()> {
        validate_entity_type(engine.entity_type())?;
        let mut engines = self.engines.write();
        if engines
            .iter()
            .any(|existing| existing.entity_type() == engine.entity_type())
        {
            return Err(SyncError::DuplicateEntityType(
                engine.entity_type().to_string(),
            ));
        }
        engines.push(engine);
        Ok(())
    }

    /// Returns the registered entity types in sync order.
    pub fn entity_types(&self) -> Vec<String> {
        self.engines
            .read()
            .iter()
            .map(|engine| engine.entity_type().to_string())
            .collect()
    }

    /// Returns when every entity type of a scope last synced successfully.
    pub fn last_synced_at(&self, scope_id: &str) -> Option<DateTime<Utc>> {
        self.last_synced.read().get(scope_id).copied()
    }

    /// Syncs every registered entity type for a scope.
    pub async fn sync_scope(&self, scope_id: &str, trigger: SyncTrigger) -> SyncReport {
        let engines = self.engines.read().clone();
        debug!(scope = scope_id, ?trigger, types = engines.len(), "sync pass started");

        let mut outcomes = Vec::with_capacity(engines.len());
        for engine in engines {
            let entity_type = engine.entity_type().to_string();
            let outcome = self.sync_entity(engine.as_ref(), scope_id).await;
            if let EntityOutcome::Failed(error) = &outcome {
                warn!(entity_type = %entity_type, scope = scope_id, error = %error, "entity type sync failed");
            }
            outcomes.push((entity_type, outcome));
        }

        let report = SyncReport {
            scope_id: scope_id.to_string(),
            trigger,
            outcomes,
        };
        if report.is_success() && !report.outcomes.is_empty() {
            let now = self.clock.now();
            self.last_synced.write().insert(scope_id.to_string(), now);
            info!(scope = scope_id, ?trigger, "sync pass completed");
        }
        report
    }

    async fn sync_entity(&self, engine: &dyn EntitySync, scope_id: &str) -> EntityOutcome {
        let key = (scope_id.to_string(), engine.entity_type().to_string());
        let Some(mut flight) = InFlight::acquire(&self.in_flight, key) else {
            debug!(entity_type = engine.entity_type(), scope = scope_id, "cycle in flight; coalescing");
            return EntityOutcome::Coalesced;
        };

        loop {
            let result = self.run_with_retry(engine, scope_id).await;
            if flight.rerun_or_release() {
                debug!(entity_type = engine.entity_type(), scope = scope_id, "running coalesced trigger");
                continue;
            }
            return match result {
                Ok(report) => EntityOutcome::Synced(report),
                Err(SyncError::CycleInFlight { .. }) => EntityOutcome::Coalesced,
                Err(e) => EntityOutcome::Failed(e.to_string()),
            };
        }
    }

    async fn run_with_retry(&self, engine: &dyn EntitySync, scope_id: &str) -> SyncResult<CycleReport> {
        let retry = engine.retry().unwrap_or(&self.retry);
        let mut attempt = 0;
        loop {
            match engine.sync_cycle(scope_id).await {
                Ok(report) => return Ok(report),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    debug!(
                        entity_type = engine.entity_type(),
                        scope = scope_id,
                        attempt,
                        ?delay,
                        error = %e,
                        "retrying sync cycle"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs [`sync_scope`](Self::sync_scope) every `period` until `shutdown`
    /// turns true or its sender is dropped.
    pub fn spawn_interval(
        self: Arc<Self>,
        scope_id: String,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sync_scope(&scope_id, SyncTrigger::Interval).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!(scope = %scope_id, "interval sync shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Starts interval sync at `config.sync_interval`, or returns `None` if
    /// interval sync is disabled.
    pub fn spawn_configured(
        self: Arc<Self>,
        scope_id: String,
        config: &SyncConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let period = config.sync_interval?;
        Some(self.spawn_interval(scope_id, period, shutdown))
    }
}
