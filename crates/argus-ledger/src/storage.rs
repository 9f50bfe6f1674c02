//! Cold storage adapter for archived audit data.
//!
//! Archival writes compressed blobs through the [`ColdStorage`] trait so
//! the same sweep logic works against object storage in production and an
//! in-memory double in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use thiserror::Error;

/// Errors from cold storage operations.
#[derive(Debug, Error, Clone)]
pub enum StorageError {
    /// The requested object does not exist.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The backend rejected or failed the operation.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Listing entry for a stored object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Object metadata.
    pub metadata: HashMap<String, String>,
}

/// Blob storage with per-object metadata and prefix listing.
#[async_trait]
pub trait ColdStorage: Send + Sync {
    /// Uploads an object, replacing any existing object at `key`.
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()>;

    /// Downloads an object.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Lists objects under a key prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    /// Deletes an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// In-memory cold storage for tests and development.
///
/// Satisfies the identical contract as a real backend, including the
/// not-found error, and can be told to fail uploads to exercise archive
/// error paths.
#[derive(Default)]
pub struct InMemoryColdStorage {
    objects: RwLock<HashMap<String, (Vec<u8>, HashMap<String, String>)>>,
    fail_puts: AtomicBool,
}

impl InMemoryColdStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `put` calls fail until reset.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.read().expect("storage lock poisoned").len()
    }
}

#[async_trait]
impl ColdStorage for InMemoryColdStorage {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected put failure".to_string()));
        }
        self.objects
            .write()
            .expect("storage lock poisoned")
            .insert(key.to_string(), (data, metadata));
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .expect("storage lock poisoned")
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let objects = self.objects.read().expect("storage lock poisoned");
        let mut infos: Vec<ObjectInfo> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (data, metadata))| ObjectInfo {
                key: key.clone(),
                size: data.len() as u64,
                metadata: metadata.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .write()
            .expect("storage lock poisoned")
            .remove(key);
        Ok(())
    }
}

/// Filesystem-backed cold storage.
///
/// Objects live under a base directory with metadata in a `.meta.json`
/// sidecar next to each blob.
pub struct LocalDirColdStorage {
    base: PathBuf,
}

impl LocalDirColdStorage {
    /// Creates a store rooted at `base`, creating the directory if needed.
    pub fn new(base: impl Into<PathBuf>) -> StorageResult<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base).map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self { base })
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.base.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.base.join(format!("{}.meta.json", key))
    }
}

#[async_trait]
impl ColdStorage for LocalDirColdStorage {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()> {
        let path = self.blob_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        std::fs::write(&path, data).map_err(|e| StorageError::Backend(e.to_string()))?;
        let meta =
            serde_json::to_vec(&metadata).map_err(|e| StorageError::Backend(e.to_string()))?;
        std::fs::write(self.meta_path(key), meta)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.blob_path(key);
        if !path.exists() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        std::fs::read(&path).map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let mut infos = Vec::new();
        let mut stack = vec![self.base.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let name = path.to_string_lossy();
                if name.ends_with(".meta.json") {
                    continue;
                }
                let key = path
                    .strip_prefix(&self.base)
                    .map_err(|e| StorageError::Backend(e.to_string()))?
                    .to_string_lossy()
                    .to_string();
                if !key.starts_with(prefix) {
                    continue;
                }
                let size = entry
                    .metadata()
                    .map(|m| m.len())
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                let metadata = std::fs::read(self.meta_path(&key))
                    .ok()
                    .and_then(|bytes| serde_json::from_slice(&bytes).ok())
                    .unwrap_or_default();
                infos.push(ObjectInfo { key, size, metadata });
            }
        }
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let _ = std::fs::remove_file(self.blob_path(key));
        let _ = std::fs::remove_file(self.meta_path(key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_memory_put_get_roundtrip() {
        let storage = InMemoryColdStorage::new();
        storage
            .put("archive/p/2026-01-01.json.gz", vec![1, 2, 3], meta(&[("policy", "p")]))
            .await
            .unwrap();
        assert_eq!(
            storage.get("archive/p/2026-01-01.json.gz").await.unwrap(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_memory_missing_object() {
        let storage = InMemoryColdStorage::new();
        assert!(matches!(
            storage.get("nope").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_list_by_prefix() {
        let storage = InMemoryColdStorage::new();
        storage
            .put("archive/a/1", vec![0], meta(&[]))
            .await
            .unwrap();
        storage
            .put("archive/b/1", vec![0, 0], meta(&[]))
            .await
            .unwrap();

        let all = storage.list("archive/").await.unwrap();
        assert_eq!(all.len(), 2);
        let only_a = storage.list("archive/a/").await.unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].size, 1);
    }

    #[tokio::test]
    async fn test_memory_injected_put_failure() {
        let storage = InMemoryColdStorage::new();
        storage.set_fail_puts(true);
        assert!(matches!(
            storage.put("k", vec![], meta(&[])).await,
            Err(StorageError::Backend(_))
        ));
        storage.set_fail_puts(false);
        storage.put("k", vec![], meta(&[])).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_dir_roundtrip_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDirColdStorage::new(dir.path()).unwrap();

        storage
            .put(
                "archive/default/2026-02-03.json.gz",
                b"blob".to_vec(),
                meta(&[("policy", "default"), ("count", "3")]),
            )
            .await
            .unwrap();

        assert_eq!(
            storage
                .get("archive/default/2026-02-03.json.gz")
                .await
                .unwrap(),
            b"blob".to_vec()
        );

        let listed = storage.list("archive/default/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metadata["policy"], "default");
        assert_eq!(listed[0].metadata["count"], "3");
    }

    #[tokio::test]
    async fn test_local_dir_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDirColdStorage::new(dir.path()).unwrap();
        storage.put("k", vec![1], meta(&[])).await.unwrap();
        storage.delete("k").await.unwrap();
        storage.delete("k").await.unwrap();
        assert!(matches!(
            storage.get("k").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
