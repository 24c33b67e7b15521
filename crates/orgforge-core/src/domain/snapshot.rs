//! Persisted topology snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orgforge_state::{sort_key, ContentDigest};

use super::topology::OuRegistry;

/// Versioned record of the provisioned topology.
///
/// Stored append-only; a snapshot is never changed after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub topology: OuRegistry,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    /// SHA-256 of the serialized topology, filled in on save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<ContentDigest>,
}

impl StateSnapshot {
    pub fn new(
        version: impl Into<String>,
        component: impl Into<String>,
        topology: OuRegistry,
    ) -> Self {
        Self {
            version: version.into(),
            timestamp: Utc::now(),
            component: component.into(),
            topology,
            tags: BTreeMap::new(),
            backup_id: None,
            digest: None,
        }
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Digest of the topology content.
    pub fn topology_digest(&self) -> serde_json::Result<ContentDigest> {
        let bytes = serde_json::to_vec(&self.topology)?;
        Ok(ContentDigest::from_bytes(&bytes))
    }
}

/// Blob key for a backup taken at `timestamp`: `<prefix>-<sort key>`.
pub fn backup_id(prefix: &str, timestamp: DateTime<Utc>) -> String {
    format!("{prefix}-{}", sort_key(timestamp))
}

/// A snapshot stored under a backup id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub snapshot: StateSnapshot,
}

impl BackupRecord {
    pub fn new(backup_id: String, snapshot: StateSnapshot, created_at: DateTime<Utc>) -> Self {
        let mut snapshot = snapshot;
        snapshot.backup_id = Some(backup_id.clone());
        Self {
            backup_id,
            created_at,
            snapshot,
        }
    }
}

/// What a cleanup pass removed, and what it could not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub state_deleted: Vec<String>,
    pub backups_deleted: Vec<String>,
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
