//! Durable topology snapshots with backup, restore and expiry cleanup.
//!
//! Snapshots are rows in a [`StateTable`] under one partition key, sorted by
//! timestamp; the newest row is the current state. Backups are JSON blobs in
//! a [`BlobStore`] named `<prefix>-<sort key>`. Every public operation holds
//! the store's operation lock, so saves, loads, backups and cleanups never
//! interleave within a process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use orgforge_state::{
    parse_sort_key, sort_key, BlobStore, StateRecord, StateTable, StorageError,
};

use crate::config::StateStoreConfig;
use crate::domain::{backup_id, BackupRecord, CleanupReport, PersistenceError, StateSnapshot};
use crate::metrics::RunMetrics;
use crate::obs;
use crate::resilience::{RetryError, RetryExecutor};

pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

pub struct StateStore {
    table: Arc<dyn StateTable>,
    blobs: Arc<dyn BlobStore>,
    config: StateStoreConfig,
    retry: RetryExecutor,
    op_lock: Arc<Mutex<()>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    metrics: Arc<RunMetrics>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("table", &self.config.table_name)
            .field("backup_bucket", &self.config.backup_bucket)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl StateStore {
    pub fn new(
        table: Arc<dyn StateTable>,
        blobs: Arc<dyn BlobStore>,
        config: StateStoreConfig,
    ) -> Self {
        let metrics = Arc::new(RunMetrics::new());
        Self {
            table,
            blobs,
            retry: RetryExecutor::new(config.retry.clone()).with_metrics(Arc::clone(&metrics)),
            config,
            op_lock: Arc::new(Mutex::new(())),
            pending: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    /// Record saves, loads, backups and cleanups in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<RunMetrics>) -> Self {
        self.retry = RetryExecutor::new(self.config.retry.clone()).with_metrics(Arc::clone(&metrics));
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &StateStoreConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> PersistenceResult<()> {
        if self.is_closed() {
            return Err(PersistenceError::Closed);
        }
        Ok(())
    }

    fn backup_key_prefix(&self) -> String {
        format!("{}-", self.config.backup_prefix)
    }

    /// Append `snapshot` as a new row and return its sort key.
    ///
    /// The stored copy carries the topology digest. A snapshot whose
    /// timestamp is already stored fails with [`PersistenceError::Conflict`]
    /// without retrying. After the row is written a backup blob is written
    /// in the background; its failure is logged and never reported here.
    #[instrument(skip(self, snapshot), fields(version = %snapshot.version))]
    pub async fn save(&self, snapshot: &StateSnapshot) -> PersistenceResult<String> {
        self.ensure_open()?;
        let _op = self.op_lock.lock().await;

        let mut stored = snapshot.clone();
        let sk = sort_key(stored.timestamp);
        let corrupt = |e: serde_json::Error| PersistenceError::Corrupt {
            key: sk.clone(),
            reason: e.to_string(),
        };
        stored.digest = Some(stored.topology_digest().map_err(corrupt)?);
        let body = serde_json::to_string(&stored).map_err(corrupt)?;
        let record = StateRecord::new(
            self.config.partition_key.clone(),
            stored.timestamp,
            body,
            stored.version.clone(),
        );

        // A sort-key collision is final, so it leaves the retry loop as `false`.
        let written = self
            .retry
            .execute(|| async {
                match self.table.put(record.clone()).await {
                    Ok(()) => Ok(true),
                    Err(StorageError::AlreadyExists { .. }) => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(|e| match e {
                RetryError::Exhausted { attempts, last } => {
                    PersistenceError::SaveExhausted { attempts, last }
                }
                RetryError::Cancelled(c) => c.into(),
            })?;
        if !written {
            return Err(PersistenceError::Conflict { key: record.sk });
        }

        self.metrics.inc_state_saves();
        info!(sk = %record.sk, ous = stored.topology.len(), "state snapshot saved");

        self.spawn_backup(stored).await;
        Ok(record.sk)
    }

    async fn spawn_backup(&self, snapshot: StateSnapshot) {
        let id = backup_id(&self.config.backup_prefix, snapshot.timestamp);
        let record = BackupRecord::new(id.clone(), snapshot, Utc::now());
        let bytes = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                obs::emit_backup_failed(&id, &e);
                return;
            }
        };

        let blobs = Arc::clone(&self.blobs);
        let retry = self.retry.clone();
        let op_lock = Arc::clone(&self.op_lock);
        let metrics = Arc::clone(&self.metrics);

        let task = tokio::spawn(async move {
            let _op = op_lock.lock().await;
            match retry.execute(|| blobs.put(&id, &bytes)).await {
                Ok(()) => {
                    metrics.inc_backups_created();
                    debug!(backup_id = %id, "background backup written");
                }
                Err(e) => obs::emit_backup_failed(&id, &e),
            }
        });

        let mut pending = self.pending.lock().await;
        pending.retain(|handle| !handle.is_finished());
        pending.push(task);
    }

    /// Latest snapshot under the partition key.
    #[instrument(skip(self))]
    pub async fn load(&self) -> PersistenceResult<StateSnapshot> {
        self.ensure_open()?;
        let _op = self.op_lock.lock().await;
        self.load_locked().await
    }

    async fn load_locked(&self) -> PersistenceResult<StateSnapshot> {
        let pk = &self.config.partition_key;
        let record = self
            .retry
            .execute(|| self.table.latest(pk))
            .await
            .map_err(load_error)?
            .ok_or_else(|| PersistenceError::NotFound { pk: pk.clone() })?;

        let snapshot = decode_snapshot(&record.sk, &record.state)?;
        self.metrics.inc_state_loads();
        debug!(sk = %record.sk, "state snapshot loaded");
        Ok(snapshot)
    }

    /// Copy the current snapshot to a new backup blob and return its id.
    #[instrument(skip(self))]
    pub async fn create_backup(&self) -> PersistenceResult<String> {
        self.ensure_open()?;
        let _op = self.op_lock.lock().await;

        let snapshot = self.load_locked().await?;
        let now = Utc::now();
        let id = backup_id(&self.config.backup_prefix, now);
        let record = BackupRecord::new(id.clone(), snapshot, now);
        let bytes = serde_json::to_vec(&record).map_err(|e| PersistenceError::Corrupt {
            key: id.clone(),
            reason: e.to_string(),
        })?;

        match self.retry.execute(|| self.blobs.put(&id, &bytes)).await {
            Ok(()) => {}
            Err(RetryError::Exhausted { last, .. }) => {
                return Err(PersistenceError::BackupFailed {
                    backup_id: id,
                    source: last,
                })
            }
            Err(RetryError::Cancelled(c)) => return Err(c.into()),
        }

        self.metrics.inc_backups_created();
        info!(backup_id = %id, "backup created");
        Ok(id)
    }

    /// Read a backup back as an owned snapshot.
    ///
    /// The stored blob is never modified; the digest is checked before the
    /// copy is returned.
    #[instrument(skip(self))]
    pub async fn restore(&self, backup_id: &str) -> PersistenceResult<StateSnapshot> {
        self.ensure_open()?;
        let _op = self.op_lock.lock().await;

        // NotFound is final, so it leaves the retry loop as `None`.
        let found = self
            .retry
            .execute(|| async {
                match self.blobs.get(backup_id).await {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(StorageError::NotFound { .. }) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(load_error)?;

        let Some(bytes) = found else {
            return Err(PersistenceError::BackupNotFound {
                backup_id: backup_id.to_string(),
            });
        };

        let record: BackupRecord =
            serde_json::from_slice(&bytes).map_err(|e| PersistenceError::Corrupt {
                key: backup_id.to_string(),
                reason: e.to_string(),
            })?;
        verify_digest(backup_id, &record.snapshot)?;

        info!(backup_id = %backup_id, ous = record.snapshot.topology.len(), "backup restored");
        Ok(record.snapshot)
    }

    /// Backup ids, oldest first.
    pub async fn list_backups(&self) -> PersistenceResult<Vec<String>> {
        self.ensure_open()?;
        let _op = self.op_lock.lock().await;
        self.list_backups_locked().await
    }

    async fn list_backups_locked(&self) -> PersistenceResult<Vec<String>> {
        let prefix = self.backup_key_prefix();
        self.retry
            .execute(|| self.blobs.list(&prefix))
            .await
            .map_err(load_error)
    }

    /// Delete snapshots and backups older than `horizon`.
    pub async fn cleanup(&self, horizon: chrono::Duration) -> PersistenceResult<CleanupReport> {
        self.cleanup_at(Utc::now(), horizon, horizon).await
    }

    /// Delete snapshots past the configured state expiry and backups past the
    /// configured backup retention.
    pub async fn cleanup_expired(&self) -> PersistenceResult<CleanupReport> {
        self.cleanup_at(
            Utc::now(),
            self.config.state_expiry(),
            self.config.backup_retention(),
        )
        .await
    }

    /// Cleanup relative to an explicit `now`.
    ///
    /// Only records strictly older than `now - horizon` are removed. A failure
    /// on one store does not stop the other; all failures come back in
    /// [`PersistenceError::Cleanup`] together with what was removed.
    #[instrument(skip(self))]
    pub async fn cleanup_at(
        &self,
        now: DateTime<Utc>,
        state_horizon: chrono::Duration,
        backup_horizon: chrono::Duration,
    ) -> PersistenceResult<CleanupReport> {
        self.ensure_open()?;
        let _op = self.op_lock.lock().await;
        let mut report = CleanupReport::default();

        let pk = &self.config.partition_key;
        let state_cutoff = sort_key(now - state_horizon);
        match self
            .retry
            .execute(|| self.table.delete_older_than(pk, &state_cutoff))
            .await
        {
            Ok(deleted) => report.state_deleted = deleted,
            Err(e) => report.failures.push(format!("state table: {e}")),
        }

        let backup_cutoff = now - backup_horizon;
        match self.list_backups_locked().await {
            Ok(keys) => {
                let prefix = self.backup_key_prefix();
                for key in keys {
                    let taken_at = key.strip_prefix(&prefix).and_then(parse_sort_key);
                    match taken_at {
                        Some(ts) if ts < backup_cutoff => {
                            match self.retry.execute(|| self.blobs.delete(&key)).await {
                                Ok(()) => report.backups_deleted.push(key),
                                Err(e) => report.failures.push(format!("backup {key}: {e}")),
                            }
                        }
                        Some(_) => {}
                        None => debug!(key = %key, "ignoring blob without a backup timestamp"),
                    }
                }
            }
            Err(e) => report.failures.push(format!("backup store: {e}")),
        }

        self.metrics.inc_cleanups_performed();
        info!(
            state_deleted = report.state_deleted.len(),
            backups_deleted = report.backups_deleted.len(),
            failures = report.failures.len(),
            "cleanup finished"
        );

        if report.is_complete() {
            Ok(report)
        } else {
            warn!(failures = ?report.failures, "cleanup incomplete");
            Err(PersistenceError::Cleanup(report))
        }
    }

    /// Wait for background backups and refuse further operations.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = std::mem::take(&mut *self.pending.lock().await);
        for handle in pending {
            if let Err(e) = handle.await {
                warn!(error = %e, "background backup task did not complete");
            }
        }
        info!(table = %self.config.table_name, "state store closed");
    }
}

fn load_error(err: RetryError<StorageError>) -> PersistenceError {
    match err {
        RetryError::Exhausted { attempts, last } => PersistenceError::LoadExhausted { attempts, last },
        RetryError::Cancelled(c) => c.into(),
    }
}

fn decode_snapshot(key: &str, body: &str) -> PersistenceResult<StateSnapshot> {
    let snapshot: StateSnapshot =
        serde_json::from_str(body).map_err(|e| PersistenceError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
    verify_digest(key, &snapshot)?;
    Ok(snapshot)
}

fn verify_digest(key: &str, snapshot: &StateSnapshot) -> PersistenceResult<()> {
    let Some(expected) = &snapshot.digest else {
        return Ok(());
    };
    let actual = snapshot
        .topology_digest()
        .map_err(|e| PersistenceError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
    if &actual != expected {
        return Err(PersistenceError::Corrupt {
            key: key.to_string(),
            reason: format!("digest mismatch: stored {}, computed {}", expected.short(), actual.short()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OuNode, OuRegistry};
    use orgforge_state::fakes::{MemoryBlobStore, MemoryStateTable};

    fn registry() -> OuRegistry {
        let mut registry = OuRegistry::new();
        registry
            .insert(OuNode {
                id: "ou-1".to_string(),
                arn: "arn:sim:ou::ou-1".to_string(),
                name: "Security".to_string(),
                parent_id: "r-0".to_string(),
            })
            .unwrap();
        registry
    }

    fn store(table: Arc<MemoryStateTable>, blobs: Arc<MemoryBlobStore>) -> StateStore {
        let mut config = StateStoreConfig::default();
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        StateStore::new(table, blobs, config)
    }

    #[tokio::test(start_paused = true)]
    async fn save_retries_then_reports_exhaustion() {
        let table = Arc::new(MemoryStateTable::new());
        table.faults.fail_always("put");
        let store = store(Arc::clone(&table), Arc::new(MemoryBlobStore::new()));

        let err = store
            .save(&StateSnapshot::new("1.0.0", "organization", registry()))
            .await
            .unwrap_err();

        assert!(matches!(err, PersistenceError::SaveExhausted { attempts: 3, .. }));
        assert_eq!(table.faults.calls("put"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn load_on_empty_store_is_not_found() {
        let store = store(Arc::new(MemoryStateTable::new()), Arc::new(MemoryBlobStore::new()));
        assert!(matches!(
            store.load().await.unwrap_err(),
            PersistenceError::NotFound { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn tampered_topology_is_corrupt() {
        let table = Arc::new(MemoryStateTable::new());
        let store = store(Arc::clone(&table), Arc::new(MemoryBlobStore::new()));
        let snapshot = StateSnapshot::new("1.0.0", "organization", registry());
        store.save(&snapshot).await.unwrap();

        let mut tampered = store.load().await.unwrap();
        tampered.topology = OuRegistry::new();
        tampered.timestamp += chrono::Duration::seconds(1);
        let body = serde_json::to_string(&tampered).unwrap();
        table
            .put(StateRecord::new("state", tampered.timestamp, body, "1.0.0"))
            .await
            .unwrap();

        assert!(matches!(
            store.load().await.unwrap_err(),
            PersistenceError::Corrupt { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn operations_after_close_are_refused() {
        let store = store(Arc::new(MemoryStateTable::new()), Arc::new(MemoryBlobStore::new()));
        store.close().await;
        store.close().await;
        assert!(matches!(store.load().await.unwrap_err(), PersistenceError::Closed));
    }
}
