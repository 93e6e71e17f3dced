//! Per entity type mapping between domain payloads and the wire.

use crate::error::{SyncError, SyncResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

/// Adapts one entity type to the generic store and engine.
///
/// An adapter is a small set of pure functions: it names the entity type,
/// converts payloads to and from the JSON `data` carried on the wire, and
/// applies partial updates. Everything else (pending flags, versions,
/// conflict handling) is done generically.
///
/// The default wire mapping uses the payload's serde representation and runs
/// [`SyncAdapter::validate`] on everything received from the server.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Debug, Serialize, Deserialize)]
/// struct Item { name: String, quantity: u32 }
///
/// struct ItemPatch { quantity: Option<u32> }
///
/// struct ItemAdapter;
///
/// impl SyncAdapter for ItemAdapter {
///     type Payload = Item;
///     type Patch = ItemPatch;
///
///     fn entity_type(&self) -> &'static str { "items" }
///
///     fn apply_patch(&self, item: &mut Item, patch: ItemPatch) {
///         if let Some(q) = patch.quantity { item.quantity = q; }
///     }
/// }
/// ```
pub trait SyncAdapter: Send + Sync + 'static {
    /// Domain payload stored in each record.
    type Payload: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Partial payload accepted by `EntityStore::update`.
    type Patch: Send;

    /// Entity type name used in document keys and on the wire.
    fn entity_type(&self) -> &str;

    /// Applies a partial update to a payload.
    fn apply_patch(&self, payload: &mut Self::Payload, patch: Self::Patch);

    /// Checks a payload received from the server.
    fn validate(&self, _payload: &Self::Payload) -> Result<(), String> {
        Ok(())
    }

    /// Serializes a payload for push.
    fn to_wire(&self, payload: &Self::Payload) -> SyncResult<Value> {
        Ok(serde_json::to_value(payload)?)
    }

    /// Builds a payload from wire data, rejecting anything that does not
    /// match the entity type's schema.
    fn from_wire(&self, data: &Value) -> SyncResult<Self::Payload> {
        let payload: Self::Payload = serde_json::from_value(data.clone()).map_err(|e| {
            SyncError::Protocol(format!("invalid {} data: {e}", self.entity_type()))
        })?;
        self.validate(&payload).map_err(|reason| {
            SyncError::Protocol(format!("invalid {} data: {reason}", self.entity_type()))
        })?;
        Ok(payload)
    }
}
