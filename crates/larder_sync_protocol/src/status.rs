//! Push outcomes reported by the server.

use serde::{Deserialize, Serialize};

/// Outcome of pushing one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushStatus {
    /// The server stored a new entity.
    Created,
    /// The server accepted the update.
    Updated,
    /// The server recorded the deletion.
    Deleted,
    /// The push was stale; the server's copy is authoritative.
    ServerVersion,
}

impl PushStatus {
    /// Returns true if this is the conflict outcome.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PushStatus::ServerVersion)
    }
}

/// Which side the server picked when it resolved a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    /// The server kept its own version.
    Server,
    /// The server accepted the client's version.
    Client,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&PushStatus::ServerVersion).unwrap(),
            "\"server_version\""
        );
        let status: PushStatus = serde_json::from_str("\"created\"").unwrap();
        assert_eq!(status, PushStatus::Created);
    }

    #[test]
    fn status_classification() {
        assert!(!PushStatus::Deleted.is_conflict());
        assert!(PushStatus::ServerVersion.is_conflict());
        assert!(!PushStatus::Updated.is_conflict());
    }
}
