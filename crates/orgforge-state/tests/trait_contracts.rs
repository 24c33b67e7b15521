//! Trait contract tests for StateTable and BlobStore.
//!
//! Every contract runs against the in-memory fakes; the StateTable contracts
//! also run against the SurrealDB implementation (in-memory engine).

use chrono::{Duration, TimeZone, Utc};
use orgforge_state::fakes::{MemoryBlobStore, MemoryStateTable};
use orgforge_state::storage_traits::*;
use orgforge_state::{StorageError, SurrealStateTable};

fn record_at(pk: &str, minutes: i64, state: &str) -> StateRecord {
    let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    StateRecord::new(pk, base + Duration::minutes(minutes), state, "1.0.0")
}

// ===========================================================================
// StateTable contracts
// ===========================================================================

async fn contract_latest_is_greatest_sort_key(table: &dyn StateTable) {
    table.put(record_at("state", 5, "{\"n\":5}")).await.unwrap();
    table.put(record_at("state", 1, "{\"n\":1}")).await.unwrap();
    table.put(record_at("state", 9, "{\"n\":9}")).await.unwrap();
    table.put(record_at("other", 60, "{\"n\":60}")).await.unwrap();

    let latest = table.latest("state").await.unwrap().unwrap();
    assert_eq!(latest.state, "{\"n\":9}");
}

async fn contract_put_is_append_only(table: &dyn StateTable) {
    table.put(record_at("state", 0, "first")).await.unwrap();
    let err = table.put(record_at("state", 0, "second")).await.unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists { .. }));

    let latest = table.latest("state").await.unwrap().unwrap();
    assert_eq!(latest.state, "first");
}

async fn contract_list_ascending(table: &dyn StateTable) {
    for m in [3, 1, 2] {
        table.put(record_at("state", m, "x")).await.unwrap();
    }
    let sks: Vec<String> = table
        .list("state")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.sk)
        .collect();
    let mut sorted = sks.clone();
    sorted.sort();
    assert_eq!(sks.len(), 3);
    assert_eq!(sks, sorted);
}

async fn contract_delete_older_than_is_strict(table: &dyn StateTable) {
    let old = record_at("state", 0, "old");
    let edge = record_at("state", 10, "edge");
    let fresh = record_at("state", 20, "fresh");
    table.put(old.clone()).await.unwrap();
    table.put(edge.clone()).await.unwrap();
    table.put(fresh.clone()).await.unwrap();

    let deleted = table.delete_older_than("state", &edge.sk).await.unwrap();
    assert_eq!(deleted, vec![old.sk]);

    let remaining: Vec<String> = table
        .list("state")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.sk)
        .collect();
    assert_eq!(remaining, vec![edge.sk, fresh.sk]);
}

async fn contract_latest_empty_partition(table: &dyn StateTable) {
    assert!(table.latest("nothing-here").await.unwrap().is_none());
}

#[tokio::test]
async fn memory_table_latest_is_greatest_sort_key() {
    contract_latest_is_greatest_sort_key(&MemoryStateTable::new()).await;
}

#[tokio::test]
async fn memory_table_put_is_append_only() {
    contract_put_is_append_only(&MemoryStateTable::new()).await;
}

#[tokio::test]
async fn memory_table_list_ascending() {
    contract_list_ascending(&MemoryStateTable::new()).await;
}

#[tokio::test]
async fn memory_table_delete_older_than_is_strict() {
    contract_delete_older_than_is_strict(&MemoryStateTable::new()).await;
}

#[tokio::test]
async fn memory_table_latest_empty_partition() {
    contract_latest_empty_partition(&MemoryStateTable::new()).await;
}

#[tokio::test]
async fn surreal_table_latest_is_greatest_sort_key() {
    let table = SurrealStateTable::in_memory().await.unwrap();
    contract_latest_is_greatest_sort_key(&table).await;
}

#[tokio::test]
async fn surreal_table_put_is_append_only() {
    let table = SurrealStateTable::in_memory().await.unwrap();
    contract_put_is_append_only(&table).await;
}

#[tokio::test]
async fn surreal_table_list_ascending() {
    let table = SurrealStateTable::in_memory().await.unwrap();
    contract_list_ascending(&table).await;
}

#[tokio::test]
async fn surreal_table_delete_older_than_is_strict() {
    let table = SurrealStateTable::in_memory().await.unwrap();
    contract_delete_older_than_is_strict(&table).await;
}

#[tokio::test]
async fn surreal_table_latest_empty_partition() {
    let table = SurrealStateTable::in_memory().await.unwrap();
    contract_latest_empty_partition(&table).await;
}

// ===========================================================================
// Fault injection
// ===========================================================================

#[tokio::test]
async fn injected_faults_fail_then_recover() {
    let table = MemoryStateTable::new();
    table.faults.fail_next("put", 2);

    assert!(table.put(record_at("state", 0, "a")).await.is_err());
    assert!(table.put(record_at("state", 0, "a")).await.is_err());
    table.put(record_at("state", 0, "a")).await.unwrap();

    assert_eq!(table.faults.calls("put"), 3);
    assert_eq!(table.len(), 1);
}

#[tokio::test]
async fn fail_always_until_cleared() {
    let blobs = MemoryBlobStore::new();
    blobs.faults.fail_always("get");
    blobs.put("k", b"v").await.unwrap();

    for _ in 0..5 {
        assert!(blobs.get("k").await.is_err());
    }
    blobs.faults.clear("get");
    assert_eq!(blobs.get("k").await.unwrap(), b"v");
}

// ===========================================================================
// BlobStore contracts
// ===========================================================================

#[tokio::test]
async fn blob_get_not_found() {
    let blobs = MemoryBlobStore::new();
    let err = blobs.get("backup-missing").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn blob_list_by_prefix() {
    let blobs = MemoryBlobStore::new();
    blobs.put("backup-b", b"2").await.unwrap();
    blobs.put("backup-a", b"1").await.unwrap();
    blobs.put("snapshot-a", b"3").await.unwrap();

    assert_eq!(
        blobs.list("backup-").await.unwrap(),
        vec!["backup-a".to_string(), "backup-b".to_string()]
    );
}

#[tokio::test]
async fn blob_delete_removes() {
    let blobs = MemoryBlobStore::new();
    blobs.put("k", b"v").await.unwrap();
    blobs.delete("k").await.unwrap();
    assert!(blobs.keys().is_empty());
}
