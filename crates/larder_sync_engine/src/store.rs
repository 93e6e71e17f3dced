//! Entity store: the persisted records of one entity type.

use crate::adapter::SyncAdapter;
use crate::change_feed::ChangeKind;
use crate::document::LocalStore;
use crate::error::SyncResult;
use crate::record::Record;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Records of one entity type, partitioned by scope.
///
/// Every mutating operation is a single read-modify-write of the scope's
/// document: it either persists completely or returns an error and leaves
/// the stored document untouched. Nothing here touches the network.
pub struct EntityStore<A: SyncAdapter> {
    local: Arc<LocalStore>,
    adapter: Arc<A>,
}

impl<A: SyncAdapter> Clone for EntityStore<A> {
    fn clone(&self) -> Self {
        Self {
            local: Arc::clone(&self.local),
            adapter: Arc::clone(&self.adapter),
        }
    }
}

impl<A: SyncAdapter> EntityStore<A> {
    /// Creates an entity store for the adapter's entity type.
    pub fn new(local: Arc<LocalStore>, adapter: Arc<A>) -> Self {
        Self { local, adapter }
    }

    /// Returns the entity type name.
    pub fn entity_type(&self) -> &str {
        self.adapter.entity_type()
    }

    /// Returns the adapter.
    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    /// Returns the shared local store.
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    /// Returns all live (non-deleted) records of a scope.
    pub fn get_all(&self, scope_id: &str) -> SyncResult<Vec<Record<A::Payload>>> {
        let mut records = self.get_all_for_sync(scope_id)?;
        records.retain(Record::is_live);
        Ok(records)
    }

    /// Returns every record of a scope, tombstones included.
    pub fn get_all_for_sync(&self, scope_id: &str) -> SyncResult<Vec<Record<A::Payload>>> {
        Ok(self
            .local
            .load::<Record<A::Payload>>(self.entity_type(), scope_id)?
            .items)
    }

    /// Returns a live record by id.
    pub fn get_by_id(&self, scope_id: &str, id: &str) -> SyncResult<Option<Record<A::Payload>>> {
        Ok(self
            .get_all_for_sync(scope_id)?
            .into_iter()
            .find(|r| r.id == id && r.is_live()))
    }

    /// Returns records with any pending flag set.
    pub fn dirty_records(&self, scope_id: &str) -> SyncResult<Vec<Record<A::Payload>>> {
        let mut records = self.get_all_for_sync(scope_id)?;
        records.retain(Record::is_dirty);
        Ok(records)
    }

    /// Creates a record with a fresh id, version 1 and `pending_create` set.
    pub fn create(&self, scope_id: &str, payload: A::Payload) -> SyncResult<Record<A::Payload>> {
        let record = Record::new_local(
            Uuid::new_v4().to_string(),
            scope_id,
            payload,
            self.local.now(),
        );

        self.local
            .transact(self.entity_type(), scope_id, |txn| {
                txn.doc.items.push(record.clone());
                txn.record_change(&record.id, ChangeKind::Created);
                Ok(())
            })?;

        debug!(entity_type = self.entity_type(), scope = scope_id, id = %record.id, "record created");
        Ok(record)
    }

    /// Applies a partial update to a live record.
    ///
    /// Returns `None` if the record does not exist or is deleted.
    pub fn update(
        &self,
        scope_id: &str,
        id: &str,
        patch: A::Patch,
    ) -> SyncResult<Option<Record<A::Payload>>> {
        let now = self.local.now();
        let adapter = Arc::clone(&self.adapter);

        self.local
            .transact(self.entity_type(), scope_id, |txn| {
                let Some(record) = txn
                    .doc
                    .items
                    .iter_mut()
                    .find(|r: &&mut Record<A::Payload>| r.id == id && r.is_live())
                else {
                    return Ok(None);
                };

                adapter.apply_patch(&mut record.payload, patch);
                record.mark_updated(now);
                let updated = record.clone();
                txn.record_change(id, ChangeKind::Updated);
                Ok(Some(updated))
            })
    }

    /// Deletes a live record.
    ///
    /// A record the server has never seen is removed outright; anything
    /// else is tombstoned with `pending_delete` set. Returns false if there
    /// was no live record to delete.
    pub fn delete(&self, scope_id: &str, id: &str) -> SyncResult<bool> {
        let now = self.local.now();

        self.local
            .transact(self.entity_type(), scope_id, |txn| {
                let Some(index) = txn
                    .doc
                    .items
                    .iter()
                    .position(|r: &Record<A::Payload>| r.id == id && r.is_live())
                else {
                    return Ok(false);
                };

                if txn.doc.items[index].never_synced() {
                    txn.doc.items.remove(index);
                    txn.record_change(id, ChangeKind::Purged);
                } else {
                    txn.doc.items[index].mark_deleted(now);
                    txn.record_change(id, ChangeKind::Deleted);
                }
                Ok(true)
            })
    }

    /// Removes confirmed tombstones last reconciled at or before `older_than`.
    ///
    /// Tombstones still waiting for the server are never purged.
    pub fn purge_confirmed_tombstones(
        &self,
        scope_id: &str,
        older_than: DateTime<Utc>,
    ) -> SyncResult<usize> {
        self.local
            .transact(self.entity_type(), scope_id, |txn| {
                let mut purged = Vec::new();
                txn.doc.items.retain(|r: &Record<A::Payload>| {
                    let confirmed = r.deleted_at.is_some()
                        && !r.is_dirty()
                        && r.last_synced_at.is_some_and(|t| t <= older_than);
                    if confirmed {
                        purged.push(r.id.clone());
                    }
                    !confirmed
                });
                for id in &purged {
                    txn.record_change(id, ChangeKind::Purged);
                }
                Ok(purged.len())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::{Item, ItemAdapter, ItemPatch};
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use larder_storage::InMemoryDocumentStore;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn setup() -> (EntityStore<ItemAdapter>, Arc<InMemoryDocumentStore>, Arc<ManualClock>) {
        let backend = Arc::new(InMemoryDocumentStore::new());
        let clock = Arc::new(ManualClock::new(ts(1_000)));
        let local = Arc::new(LocalStore::with_clock(backend.clone(), clock.clone()));
        (EntityStore::new(local, Arc::new(ItemAdapter)), backend, clock)
    }

    /// Simulates the server acknowledging every pending record.
    fn acknowledge_all(store: &EntityStore<ItemAdapter>, scope: &str, at: DateTime<Utc>) {
        store
            .local
            .transact(store.entity_type(), scope, |txn| {
                for record in txn.doc.items.iter_mut() {
                    let record: &mut Record<Item> = record;
                    record.clear_pending();
                    record.server_updated_at = Some(at);
                    record.last_synced_at = Some(at);
                }
                txn.mark_dirty();
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn create_assigns_id_and_pending_create() {
        let (store, _, _) = setup();
        let record = store.create("home", Item::new("rice", 2)).unwrap();

        assert!(!record.id.is_empty());
        assert_eq!(record.version, 1);
        assert!(record.pending_create);
        assert_eq!(record.client_updated_at, ts(1_000));
        assert_eq!(store.get_by_id("home", &record.id).unwrap(), Some(record));
    }

    #[test]
    fn scopes_are_isolated() {
        let (store, _, _) = setup();
        store.create("home", Item::new("rice", 2)).unwrap();
        store.create("cabin", Item::new("salt", 1)).unwrap();

        assert_eq!(store.get_all("home").unwrap().len(), 1);
        assert_eq!(store.get_all("cabin").unwrap().len(), 1);
        assert!(store.get_all("office").unwrap().is_empty());
    }

    #[test]
    fn update_bumps_version_and_keeps_create_flag() {
        let (store, _, clock) = setup();
        let record = store.create("home", Item::new("rice", 2)).unwrap();
        clock.advance(Duration::seconds(5));

        let updated = store
            .update("home", &record.id, ItemPatch::quantity(5))
            .unwrap()
            .unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.payload.quantity, 5);
        assert!(updated.pending_create);
        assert!(!updated.pending_update);
        assert_eq!(updated.client_updated_at, ts(1_005));
    }

    #[test]
    fn update_of_synced_record_sets_pending_update() {
        let (store, _, _) = setup();
        let record = store.create("home", Item::new("rice", 2)).unwrap();
        acknowledge_all(&store, "home", ts(1_001));

        let updated = store
            .update("home", &record.id, ItemPatch::quantity(1))
            .unwrap()
            .unwrap();
        assert!(updated.pending_update);
        assert!(!updated.pending_create);
    }

    #[test]
    fn update_missing_returns_none() {
        let (store, _, _) = setup();
        assert!(store
            .update("home", "nope", ItemPatch::quantity(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn delete_unsynced_record_purges_it() {
        let (store, _, _) = setup();
        let record = store.create("home", Item::new("rice", 2)).unwrap();

        assert!(store.delete("home", &record.id).unwrap());
        assert!(store.get_all("home").unwrap().is_empty());
        assert!(store.get_all_for_sync("home").unwrap().is_empty());
    }

    #[test]
    fn delete_synced_record_tombstones_it() {
        let (store, _, _) = setup();
        let record = store.create("home", Item::new("rice", 2)).unwrap();
        acknowledge_all(&store, "home", ts(1_001));
        store
            .update("home", &record.id, ItemPatch::quantity(9))
            .unwrap();

        assert!(store.delete("home", &record.id).unwrap());

        assert!(store.get_all("home").unwrap().is_empty());
        assert!(store.get_by_id("home", &record.id).unwrap().is_none());
        let all = store.get_all_for_sync("home").unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].pending_delete);
        assert!(!all[0].pending_update);
        assert!(all[0].deleted_at.is_some());

        // A second delete finds nothing live.
        assert!(!store.delete("home", &record.id).unwrap());
    }

    #[test]
    fn failed_write_is_surfaced_and_not_committed() {
        let (store, backend, _) = setup();
        let record = store.create("home", Item::new("rice", 2)).unwrap();

        backend.fail_writes(true);
        assert!(store.update("home", &record.id, ItemPatch::quantity(7)).is_err());
        assert!(store.create("home", Item::new("salt", 1)).is_err());
        backend.fail_writes(false);

        let all = store.get_all("home").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].payload.quantity, 2);
        assert_eq!(all[0].version, 1);
    }

    #[test]
    fn mutations_are_published() {
        let (store, _, _) = setup();
        let rx = store.local().subscribe();

        let record = store.create("home", Item::new("rice", 2)).unwrap();
        store
            .update("home", &record.id, ItemPatch::quantity(3))
            .unwrap();
        store.delete("home", &record.id).unwrap();

        let kinds: Vec<_> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Created, ChangeKind::Updated, ChangeKind::Purged]
        );
    }

    #[test]
    fn purge_only_confirmed_tombstones() {
        let (store, _, _) = setup();
        let a = store.create("home", Item::new("a", 1)).unwrap();
        let b = store.create("home", Item::new("b", 1)).unwrap();
        acknowledge_all(&store, "home", ts(1_001));
        store.delete("home", &a.id).unwrap();
        store.delete("home", &b.id).unwrap();

        // `a` is confirmed by the server, `b` still waits.
        store
            .local
            .transact(store.entity_type(), "home", |txn| {
                let record: &mut Record<Item> = txn
                    .doc
                    .items
                    .iter_mut()
                    .find(|r: &&mut Record<Item>| r.id == a.id)
                    .unwrap();
                record.pending_delete = false;
                record.last_synced_at = Some(ts(1_002));
                txn.mark_dirty();
                Ok(())
            })
            .unwrap();

        assert_eq!(store.purge_confirmed_tombstones("home", ts(1_001)).unwrap(), 0);
        assert_eq!(store.purge_confirmed_tombstones("home", ts(1_002)).unwrap(), 1);

        let remaining = store.get_all_for_sync("home").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b.id);
    }
}
