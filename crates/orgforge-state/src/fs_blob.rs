use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::storage_traits::{BlobStore, StorageResult};

/// Filesystem-backed blob store: one file per key under `<root>/blobs/`.
pub struct FsBlobStore {
    blobs_dir: PathBuf,
}

impl FsBlobStore {
    /// Create a new `FsBlobStore` rooted at `root`. Creates `root/blobs/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let blobs_dir = root.as_ref().join("blobs");
        std::fs::create_dir_all(&blobs_dir)?;
        Ok(Self { blobs_dir })
    }

    fn blob_path(&self, key: &str) -> StorageResult<PathBuf> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
        if !valid {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.blobs_dir.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.blob_path(key)?;
        let dir = self.blobs_dir.clone();
        let data = data.to_vec();

        // Atomic write: temp file in the same directory, then rename.
        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&data)?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Backend(format!("blob write task failed: {e}")))?
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.blob_path(key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.blobs_dir).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                // Skip in-flight temp files from `put`.
                if name.starts_with(".tmp") {
                    continue;
                }
                if name.starts_with(prefix) {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.blob_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn blob_roundtrip() {
        let (_dir, store) = make_store();
        store.put("backup-1", b"hello").await.unwrap();
        assert_eq!(store.get("backup-1").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn put_replaces_existing_blob() {
        let (_dir, store) = make_store();
        store.put("k", b"one").await.unwrap();
        store.put("k", b"two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_sorts() {
        let (_dir, store) = make_store();
        store.put("backup-2026-01-02", b"b").await.unwrap();
        store.put("snapshot-2026-01-01", b"s").await.unwrap();
        store.put("backup-2026-01-01", b"a").await.unwrap();

        let keys = store.list("backup-").await.unwrap();
        assert_eq!(keys, vec!["backup-2026-01-01", "backup-2026-01-02"]);
    }

    #[tokio::test]
    async fn get_missing_returns_not_found() {
        let (_dir, store) = make_store();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let (_dir, store) = make_store();
        store.delete("never-written").await.unwrap();
    }

    #[tokio::test]
    async fn path_traversal_key_rejected() {
        let (_dir, store) = make_store();
        let err = store.put("../escape", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }
}
