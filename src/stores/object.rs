//! Durable byte-blob storage keyed by object key. No business logic lives
//! here; the gateway owns the key scheme.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs;

use crate::errors::{PipelineError, Result};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, overwriting any previous object.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch the object at `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete the object at `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Cheap liveness probe for health reporting.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory object store for tests and single-process setups.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects. Used by tests asserting cleanup.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::Processing(format!("object {key} not found")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().remove(key);
        Ok(())
    }
}

/// Filesystem-backed object store.
///
/// Keys are normalized into file names under a root directory so the
/// hierarchical `documents/{id}/original` scheme maps onto a flat, safe
/// layout regardless of what the key contains.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(name)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|err| PipelineError::unavailable("object store", err))?;
        fs::write(self.object_path(key), bytes)
            .await
            .map_err(|err| PipelineError::unavailable("object store", err))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::Processing(format!("object {key} not found")))
            }
            Err(err) => Err(PipelineError::unavailable("object store", err)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PipelineError::unavailable("object store", err)),
        }
    }

    async fn ping(&self) -> Result<()> {
        fs::metadata(&self.root)
            .await
            .map(|_| ())
            .map_err(|err| PipelineError::unavailable("object store", err))
    }
}
