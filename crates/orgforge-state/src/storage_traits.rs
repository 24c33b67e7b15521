//! Storage trait definitions for orgforge
//!
//! These traits define the two storage abstractions the state store needs:
//! - `StateTable`: append-only key-value table (partition key + sort key)
//! - `BlobStore`: named blob storage for backup copies
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Render a timestamp as a sort key.
///
/// ISO-8601 in UTC with a fixed microsecond width, so lexicographic order of
/// keys equals chronological order of timestamps.
pub fn sort_key(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a sort key (or the timestamp suffix of a blob key) back to a timestamp.
pub fn parse_sort_key(key: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(key)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StateTable
// ---------------------------------------------------------------------------

/// One row of the state table.
///
/// `state` is an opaque JSON document; the table never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Partition key, fixed per deployment
    pub pk: String,
    /// Sort key, see [`sort_key`]
    pub sk: String,
    /// Serialized state blob
    pub state: String,
    /// Schema/application version that wrote the row
    pub version: String,
}

impl StateRecord {
    pub fn new(
        pk: impl Into<String>,
        timestamp: DateTime<Utc>,
        state: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            pk: pk.into(),
            sk: sort_key(timestamp),
            state: state.into(),
            version: version.into(),
        }
    }

    /// Timestamp encoded in the sort key.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_sort_key(&self.sk)
    }
}

/// Append-only state table.
///
/// Guarantees:
/// - `put` never overwrites: a second row with the same `(pk, sk)` is rejected
///   with `StorageError::AlreadyExists`.
/// - `latest` returns the row with the greatest sort key under `pk`.
/// - `delete_older_than` removes only rows whose sort key is strictly less
///   than the cutoff.
#[async_trait]
pub trait StateTable: Send + Sync {
    /// Insert a new row.
    async fn put(&self, record: StateRecord) -> StorageResult<()>;

    /// Most recent row under `pk`, if any.
    async fn latest(&self, pk: &str) -> StorageResult<Option<StateRecord>>;

    /// All rows under `pk`, ascending by sort key.
    async fn list(&self, pk: &str) -> StorageResult<Vec<StateRecord>>;

    /// Delete rows under `pk` with `sk < cutoff`. Returns the deleted sort keys.
    async fn delete_older_than(&self, pk: &str, cutoff: &str) -> StorageResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// BlobStore
// ---------------------------------------------------------------------------

/// Named blob storage.
///
/// Guarantees:
/// - `get(key)` returns the exact bytes last stored under `key`.
/// - `list(prefix)` returns matching keys in ascending order.
/// - `delete` is a no-op for absent keys.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`, replacing any previous blob.
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Retrieve bytes by key. Returns `StorageError::NotFound` if absent.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Keys starting with `prefix`, ascending.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Delete a blob by key.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}
