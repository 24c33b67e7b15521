//! SurrealDB-backed StateTable implementation
//!
//! Rows live in the `state_records` table; see `migrations` for the schema.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::migrations;
use crate::storage_traits::{StateRecord, StateTable, StorageResult};

const NAMESPACE: &str = "orgforge";
const DATABASE: &str = "state";

/// Database row for `state_records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbStateRecord {
    /// SurrealDB record ID
    id: Option<surrealdb::sql::Thing>,
    pk: String,
    sk: String,
    state: String,
    version: String,
}

impl From<StateRecord> for DbStateRecord {
    fn from(record: StateRecord) -> Self {
        Self {
            id: None,
            pk: record.pk,
            sk: record.sk,
            state: record.state,
            version: record.version,
        }
    }
}

impl From<DbStateRecord> for StateRecord {
    fn from(row: DbStateRecord) -> Self {
        Self {
            pk: row.pk,
            sk: row.sk,
            state: row.state,
            version: row.version,
        }
    }
}

/// SurrealDB-backed implementation of [`StateTable`].
pub struct SurrealStateTable {
    db: Surreal<Any>,
}

impl SurrealStateTable {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        let table = Self::connect("mem://").await?;
        info!("SurrealStateTable connected (in-memory)");
        Ok(table)
    }

    /// Open a local on-disk table under `dir` using the SurrealKV engine.
    pub async fn open_local(dir: impl AsRef<std::path::Path>) -> StorageResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let url = format!("surrealkv://{}", dir.display());
        let table = Self::connect(&url).await?;
        info!(url = %url, "SurrealStateTable connected (local)");
        Ok(table)
    }

    /// Connect to any SurrealDB endpoint URL and initialise the schema.
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect to {url}: {e}")))?;

        db.use_ns(NAMESPACE).use_db(DATABASE).await?;

        migrations::init_schema(&db).await?;
        Ok(Self { db })
    }

    async fn fetch(&self, pk: &str, sk: &str) -> StorageResult<Option<DbStateRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM state_records WHERE pk = $pk AND sk = $sk LIMIT 1")
            .bind(("pk", pk.to_string()))
            .bind(("sk", sk.to_string()))
            .await?;
        let rows: Vec<DbStateRecord> = res.take(0)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl StateTable for SurrealStateTable {
    async fn put(&self, record: StateRecord) -> StorageResult<()> {
        if self.fetch(&record.pk, &record.sk).await?.is_some() {
            return Err(StorageError::AlreadyExists {
                pk: record.pk,
                sk: record.sk,
            });
        }

        debug!(pk = %record.pk, sk = %record.sk, "writing state record");
        let _created: Option<DbStateRecord> = self
            .db
            .create("state_records")
            .content(DbStateRecord::from(record))
            .await?;
        Ok(())
    }

    async fn latest(&self, pk: &str) -> StorageResult<Option<StateRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM state_records WHERE pk = $pk ORDER BY sk DESC LIMIT 1")
            .bind(("pk", pk.to_string()))
            .await?;
        let rows: Vec<DbStateRecord> = res.take(0)?;
        Ok(rows.into_iter().next().map(StateRecord::from))
    }

    async fn list(&self, pk: &str) -> StorageResult<Vec<StateRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM state_records WHERE pk = $pk ORDER BY sk ASC")
            .bind(("pk", pk.to_string()))
            .await?;
        let rows: Vec<DbStateRecord> = res.take(0)?;
        Ok(rows.into_iter().map(StateRecord::from).collect())
    }

    async fn delete_older_than(&self, pk: &str, cutoff: &str) -> StorageResult<Vec<String>> {
        let mut res = self
            .db
            .query("DELETE state_records WHERE pk = $pk AND sk < $cutoff RETURN BEFORE")
            .bind(("pk", pk.to_string()))
            .bind(("cutoff", cutoff.to_string()))
            .await?;
        let rows: Vec<DbStateRecord> = res.take(0)?;
        debug!(pk = %pk, cutoff = %cutoff, deleted = rows.len(), "expired state records");
        Ok(rows.into_iter().map(|r| r.sk).collect())
    }
}
