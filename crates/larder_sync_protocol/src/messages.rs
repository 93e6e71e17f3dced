//! Protocol messages for sync.
//!
//! A sync exchange is one request/response pair. The request carries any
//! number of per entity type push and pull requests; the response carries
//! the matching results and the server's clock.

use crate::entity::{PullEntity, PushEntity, ServerVersionData};
use crate::error::{ProtocolError, ProtocolResult};
use crate::status::{PushStatus, Winner};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

fn encode_cbor<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(message, &mut bytes).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(bytes)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Batched push of dirty records for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Entity type name.
    pub entity_type: String,
    /// Dirty entities.
    pub entities: Vec<PushEntity>,
    /// Last successful sync time for this entity type.
    #[serde(default)]
    pub last_pulled_at: Option<DateTime<Utc>>,
    /// Last pulled server version, used by the server to detect races.
    #[serde(default)]
    pub checkpoint: Option<u64>,
}

/// Request for changes of one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Entity type name.
    pub entity_type: String,
    /// Changes after this time; `None` requests a full pull.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Whether deleted entity ids should be reported.
    pub include_deleted: bool,
    /// Last pulled server version.
    #[serde(default)]
    pub checkpoint: Option<u64>,
}

impl PullRequest {
    /// Creates a pull request that includes deletions.
    pub fn new(
        entity_type: impl Into<String>,
        since: Option<DateTime<Utc>>,
        checkpoint: Option<u64>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            since,
            include_deleted: true,
            checkpoint,
        }
    }
}

/// Outcome for one pushed entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEntityResult {
    /// Entity id.
    pub entity_id: String,
    /// What the server did with the entity.
    pub status: PushStatus,
    /// Authoritative version assigned by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<u64>,
    /// The server's copy, present for `server_version` outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version_data: Option<ServerVersionData>,
    /// Which side won, if the server reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
}

impl PushEntityResult {
    /// Creates an accepted outcome.
    pub fn accepted(entity_id: impl Into<String>, status: PushStatus, version: u64) -> Self {
        Self {
            entity_id: entity_id.into(),
            status,
            server_version: Some(version),
            server_version_data: None,
            winner: None,
        }
    }

    /// Creates a deletion outcome.
    pub fn deleted(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            status: PushStatus::Deleted,
            server_version: None,
            server_version_data: None,
            winner: None,
        }
    }

    /// Creates a conflict outcome carrying the server's copy.
    pub fn conflict(entity_id: impl Into<String>, server: ServerVersionData) -> Self {
        Self {
            entity_id: entity_id.into(),
            status: PushStatus::ServerVersion,
            server_version: Some(server.version),
            server_version_data: Some(server),
            winner: Some(Winner::Server),
        }
    }
}

/// Push outcomes for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    /// Entity type name.
    pub entity_type: String,
    /// Per-entity outcomes.
    pub results: Vec<PushEntityResult>,
}

/// Changes of one entity type since a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResult {
    /// Entity type name.
    pub entity_type: String,
    /// Created or updated entities.
    #[serde(default)]
    pub entities: Vec<PullEntity>,
    /// Ids deleted since the checkpoint.
    #[serde(default)]
    pub deleted_entity_ids: Vec<String>,
    /// New checkpoint to store after applying this result.
    #[serde(default)]
    pub checkpoint: Option<u64>,
}

/// The single batched call sent to the sync server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Scope being synced.
    pub scope_id: String,
    /// Sending device.
    pub device_id: String,
    /// Push requests, at most one per entity type.
    #[serde(default)]
    pub push_requests: Vec<PushRequest>,
    /// Pull requests, at most one per entity type.
    #[serde(default)]
    pub pull_requests: Vec<PullRequest>,
}

impl SyncRequest {
    /// Creates an empty request.
    pub fn new(scope_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            scope_id: scope_id.into(),
            device_id: device_id.into(),
            push_requests: Vec::new(),
            pull_requests: Vec::new(),
        }
    }

    /// Adds a push request.
    pub fn with_push(mut self, request: PushRequest) -> Self {
        self.push_requests.push(request);
        self
    }

    /// Adds a pull request.
    pub fn with_pull(mut self, request: PullRequest) -> Self {
        self.pull_requests.push(request);
        self
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// The server's answer to a [`SyncRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Whether the server processed the request.
    pub success: bool,
    /// Server clock at the time of the response.
    pub server_timestamp: DateTime<Utc>,
    /// Push outcomes per entity type.
    #[serde(default)]
    pub push_results: Vec<PushResult>,
    /// Pull results per entity type.
    #[serde(default)]
    pub pull_results: Vec<PullResult>,
    /// Error message if `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResponse {
    /// Creates an empty successful response.
    pub fn success(server_timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            server_timestamp,
            push_results: Vec::new(),
            pull_results: Vec::new(),
            error: None,
        }
    }

    /// Creates a failed response.
    pub fn error(server_timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            server_timestamp,
            push_results: Vec::new(),
            pull_results: Vec::new(),
            error: Some(message.into()),
        }
    }

    /// Returns the push outcomes for an entity type.
    pub fn push_result(&self, entity_type: &str) -> Option<&PushResult> {
        self.push_results
            .iter()
            .find(|r| r.entity_type == entity_type)
    }

    /// Returns the pull result for an entity type.
    pub fn pull_result(&self, entity_type: &str) -> Option<&PullResult> {
        self.pull_results
            .iter()
            .find(|r| r.entity_type == entity_type)
    }

    /// Checks the structural rules every response must follow.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if an entity type is reported twice, or if a
    /// `server_version` outcome lacks the server's copy.
    pub fn validate(&self) -> ProtocolResult<()> {
        let mut seen = HashSet::new();
        for result in &self.push_results {
            if !seen.insert(result.entity_type.as_str()) {
                return Err(ProtocolError::invalid(format!(
                    "duplicate push result for {}",
                    result.entity_type
                )));
            }
            for outcome in &result.results {
                if outcome.status.is_conflict() && outcome.server_version_data.is_none() {
                    return Err(ProtocolError::invalid(format!(
                        "server_version outcome for {} without server data",
                        outcome.entity_id
                    )));
                }
            }
        }

        let mut seen = HashSet::new();
        for result in &self.pull_results {
            if !seen.insert(result.entity_type.as_str()) {
                return Err(ProtocolError::invalid(format!(
                    "duplicate pull result for {}",
                    result.entity_type
                )));
            }
        }
        Ok(())
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}
