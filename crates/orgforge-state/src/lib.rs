//! orgforge-state: durable storage for provisioned topology
//!
//! This crate is the persistence layer underneath the orgforge state store.
//! It knows nothing about organizations or OUs; it stores opaque JSON state
//! blobs keyed by a fixed partition key and a timestamp sort key, plus backup
//! blobs keyed by name.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: append-only records, ordered retrieval, expiry deletes.
//!
//! ## Key Components
//!
//! - `StateTable`: key-value table of `StateRecord` rows (partition + sort key)
//! - `BlobStore`: named blob storage used for backups
//! - `SurrealStateTable`: SurrealDB-backed `StateTable`
//! - `FsBlobStore`: filesystem-backed `BlobStore`
//! - `fakes`: in-memory implementations with fault injection

mod error;
pub mod fakes;
mod fs_blob;
mod migrations;
pub mod storage_traits;
mod surreal_table;

pub use error::StorageError;
pub use fs_blob::FsBlobStore;
pub use storage_traits::{
    parse_sort_key, sort_key, BlobStore, ContentDigest, StateRecord, StateTable, StorageResult,
};
pub use surreal_table::SurrealStateTable;
