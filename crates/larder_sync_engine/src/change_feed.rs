//! Change feed for observing committed store writes.
//!
//! Every write the entity store commits, whether it came from a local
//! mutation or from applying sync results, is published here after the
//! document has been persisted. UI layers subscribe to refresh their views
//! without the store knowing anything about them.
//!
//! # Usage
//!
//! ```rust,ignore
//! let receiver = local_store.subscribe();
//!
//! std::thread::spawn(move || {
//!     while let Ok(event) = receiver.recv() {
//!         println!("{} {:?} {}", event.entity_type, event.kind, event.record_id);
//!     }
//! });
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Created locally.
    Created,
    /// Updated locally.
    Updated,
    /// Tombstoned, locally or by a pulled deletion.
    Deleted,
    /// Removed from the store entirely.
    Purged,
    /// Server data was merged in by a pull.
    Pulled,
    /// A pushed write was acknowledged.
    Confirmed,
    /// A pushed write lost to the server's copy.
    Conflicted,
}

impl ChangeKind {
    /// Returns true if the change was caused by sync rather than a local
    /// mutation.
    pub fn from_sync(self) -> bool {
        matches!(
            self,
            ChangeKind::Pulled | ChangeKind::Confirmed | ChangeKind::Conflicted
        )
    }
}

/// A single committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// Increases in commit order across every collection.
    pub sequence: u64,
    /// Entity type of the record.
    pub entity_type: String,
    /// Scope of the record.
    pub scope_id: String,
    /// Record id.
    pub record_id: String,
    /// What happened.
    pub kind: ChangeKind,
}

/// Fans committed store writes out to any number of subscribers.
///
/// Subscribers whose receiver has been dropped are forgotten on the next
/// emit.
#[derive(Default)]
pub struct ChangeFeed {
    subscribers: Mutex<Vec<Sender<StoreEvent>>>,
    sequence: AtomicU64,
}

impl ChangeFeed {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver for every change committed from now on.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Publishes a change and returns its sequence number.
    pub fn emit(
        &self,
        entity_type: &str,
        scope_id: &str,
        record_id: &str,
        kind: ChangeKind,
    ) -> u64 {
        // Holding the subscriber lock keeps delivery in sequence order.
        let mut subscribers = self.subscribers.lock();
        let event = StoreEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            entity_type: entity_type.to_string(),
            scope_id: scope_id.to_string(),
            record_id: record_id.to_string(),
            kind,
        };
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        event.sequence
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
