//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryStateTable` and `MemoryBlobStore` that satisfy the trait
//! contracts without any external dependencies. Both carry a
//! [`FaultInjector`] so tests can make individual operations fail a fixed
//! number of times.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// FaultInjector
// ---------------------------------------------------------------------------

/// Scripted failures keyed by operation name (`"put"`, `"latest"`, ...).
#[derive(Debug, Default)]
pub struct FaultInjector {
    remaining: Mutex<HashMap<String, u32>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl FaultInjector {
    /// Fail the next `times` calls of `op`.
    pub fn fail_next(&self, op: &str, times: u32) {
        self.remaining
            .lock()
            .unwrap()
            .insert(op.to_string(), times);
    }

    /// Fail every call of `op` until [`FaultInjector::clear`].
    pub fn fail_always(&self, op: &str) {
        self.fail_next(op, u32::MAX);
    }

    pub fn clear(&self, op: &str) {
        self.remaining.lock().unwrap().remove(op);
    }

    /// Number of times `op` has been invoked, failed or not.
    pub fn calls(&self, op: &str) -> u32 {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    fn check(&self, op: &str) -> StorageResult<()> {
        *self.calls.lock().unwrap().entry(op.to_string()).or_default() += 1;

        let mut remaining = self.remaining.lock().unwrap();
        match remaining.get_mut(op) {
            Some(0) | None => Ok(()),
            Some(n) => {
                if *n != u32::MAX {
                    *n -= 1;
                }
                Err(StorageError::Backend(format!("injected failure: {op}")))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStateTable
// ---------------------------------------------------------------------------

/// In-memory state table backed by a `BTreeMap<(pk, sk), StateRecord>`.
#[derive(Debug, Default)]
pub struct MemoryStateTable {
    rows: Mutex<BTreeMap<(String, String), StateRecord>>,
    pub faults: FaultInjector,
}

impl MemoryStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows across all partitions.
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateTable for MemoryStateTable {
    async fn put(&self, record: StateRecord) -> StorageResult<()> {
        self.faults.check("put")?;
        let mut rows = self.rows.lock().unwrap();
        let key = (record.pk.clone(), record.sk.clone());
        if rows.contains_key(&key) {
            return Err(StorageError::AlreadyExists {
                pk: record.pk,
                sk: record.sk,
            });
        }
        rows.insert(key, record);
        Ok(())
    }

    async fn latest(&self, pk: &str) -> StorageResult<Option<StateRecord>> {
        self.faults.check("latest")?;
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|r| r.pk == pk)
            .max_by(|a, b| a.sk.cmp(&b.sk))
            .cloned())
    }

    async fn list(&self, pk: &str) -> StorageResult<Vec<StateRecord>> {
        self.faults.check("list")?;
        let rows = self.rows.lock().unwrap();
        // BTreeMap iteration is already (pk, sk)-ordered.
        Ok(rows.values().filter(|r| r.pk == pk).cloned().collect())
    }

    async fn delete_older_than(&self, pk: &str, cutoff: &str) -> StorageResult<Vec<String>> {
        self.faults.check("delete_older_than")?;
        let mut rows = self.rows.lock().unwrap();
        let doomed: Vec<(String, String)> = rows
            .keys()
            .filter(|(p, s)| p == pk && s.as_str() < cutoff)
            .cloned()
            .collect();
        for key in &doomed {
            rows.remove(key);
        }
        Ok(doomed.into_iter().map(|(_, sk)| sk).collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-memory blob store backed by a `BTreeMap<key, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    pub faults: FaultInjector,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.faults.check("put")?;
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.faults.check("get")?;
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.faults.check("list")?;
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.faults.check("delete")?;
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }
}
