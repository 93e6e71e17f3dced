//! Entity representations carried in push and pull messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A dirty local record serialized for push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEntity {
    /// Client-generated entity id.
    pub entity_id: String,
    /// Owning scope.
    pub scope_id: String,
    /// Domain payload as produced by the entity type's adapter.
    pub data: Value,
    /// Local version at the time of the push.
    pub version: u64,
    /// Time of the last local edit.
    pub client_updated_at: DateTime<Utc>,
    /// The server has never acknowledged this entity.
    #[serde(default)]
    pub pending_create: bool,
    /// The entity was deleted locally.
    #[serde(default)]
    pub pending_delete: bool,
}

/// An entity returned by the server in a pull result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullEntity {
    /// Entity id.
    pub entity_id: String,
    /// Domain payload.
    pub data: Value,
    /// Authoritative version.
    pub version: u64,
    /// Time the server stored this version.
    pub updated_at: DateTime<Utc>,
    /// Client edit time reported by the writer, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_updated_at: Option<DateTime<Utc>>,
}

/// The server's copy of an entity, returned with a `server_version` outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerVersionData {
    /// Domain payload.
    pub data: Value,
    /// Authoritative version.
    pub version: u64,
    /// Time the server stored this version.
    pub updated_at: DateTime<Utc>,
    /// Client edit time reported by the writer, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_updated_at: Option<DateTime<Utc>>,
}
