//! Error types for orgforge-state

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Requested record or blob does not exist
    #[error("not found: {key}")]
    NotFound { key: String },

    /// A record with the same partition and sort key was already written
    #[error("record already exists: {pk}/{sk}")]
    AlreadyExists { pk: String, sk: String },

    /// Blob key contains characters that cannot be stored
    #[error("invalid blob key: {key}")]
    InvalidKey { key: String },

    /// Digest string is not 64 lowercase hex chars
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Backend (database, filesystem, injected fault) failure
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
