//! SurrealDB schema initialization for the state table
//!
//! Called once per connection. Re-running definitions against an existing
//! table is harmless: per-statement errors are not checked.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Initialize all orgforge tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing orgforge SurrealDB schema");
    init_state_records_table(db).await?;
    info!("orgforge schema initialization complete");
    Ok(())
}

/// Initialize `state_records` table
///
/// Schema:
/// ```text
/// TABLE state_records {
///   pk:       STRING (partition key)
///   sk:       STRING (ISO-8601 sort key)
///   state:    STRING (JSON blob)
///   version:  STRING
/// }
/// ```
///
/// Constraints:
/// - `(pk, sk)` is unique: rows are append-only
/// - rows are never updated; expiry removes them with DELETE
async fn init_state_records_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing state_records table");

    let sql = r#"
        DEFINE TABLE state_records AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete FULL;

        DEFINE INDEX idx_pk_sk ON TABLE state_records COLUMNS pk, sk UNIQUE;
        DEFINE INDEX idx_pk ON TABLE state_records COLUMNS pk;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StorageError::Backend(format!("schema setup failed: {e}")))?;
    info!("state_records table initialized");

    Ok(())
}
