//! Mock storage gateway for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::job::IdToken;
use crate::storage::{StorageError, StorageGateway};

/// A recorded publish for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedPublish {
    pub remote_path: String,
    /// File contents at the time of the upload.
    pub contents: Vec<u8>,
    /// Token the upload was authorized with.
    pub token: String,
}

impl RecordedPublish {
    /// Contents parsed as JSON, for snapshot uploads.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.contents).ok()
    }
}

/// Mock implementation of the StorageGateway trait.
///
/// Blobs live in memory. `fetch` fails with `NotFound` for anything not
/// seeded or published before.
#[derive(Debug, Default)]
pub struct MockStorage {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    publishes: Arc<RwLock<Vec<RecordedPublish>>>,
    fetches: Arc<RwLock<Vec<String>>>,
    removed: Arc<RwLock<Vec<String>>>,
    failing_publishes: Arc<RwLock<HashSet<String>>>,
}

impl MockStorage {
    /// Create an empty mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `remote_path` available for fetching.
    pub async fn seed_blob(&self, remote_path: &str, contents: &[u8]) {
        self.blobs
            .write()
            .await
            .insert(remote_path.to_string(), contents.to_vec());
    }

    /// Make every publish to `remote_path` fail with a transfer error.
    pub async fn fail_publish_to(&self, remote_path: &str) {
        self.failing_publishes
            .write()
            .await
            .insert(remote_path.to_string());
    }

    /// Current contents of a blob.
    pub async fn blob(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.blobs.read().await.get(remote_path).cloned()
    }

    /// All successful publishes in call order.
    pub async fn recorded_publishes(&self) -> Vec<RecordedPublish> {
        self.publishes.read().await.clone()
    }

    /// Remote paths of successful publishes in call order.
    pub async fn published_paths(&self) -> Vec<String> {
        self.publishes
            .read()
            .await
            .iter()
            .map(|p| p.remote_path.clone())
            .collect()
    }

    /// Statuses of the snapshots published for job `id`, in order.
    pub async fn snapshot_statuses(&self, id: &str) -> Vec<String> {
        let remote_path = format!("configs/requests/{}.json", id);
        self.publishes
            .read()
            .await
            .iter()
            .filter(|p| p.remote_path == remote_path)
            .filter_map(|p| p.json())
            .filter_map(|json| json["status"].as_str().map(str::to_string))
            .collect()
    }

    /// Remote paths fetched, in call order.
    pub async fn fetched_paths(&self) -> Vec<String> {
        self.fetches.read().await.clone()
    }

    /// Remote paths passed to `remove`, in call order.
    pub async fn removed_paths(&self) -> Vec<String> {
        self.removed.read().await.clone()
    }
}

#[async_trait]
impl StorageGateway for MockStorage {
    async fn fetch(
        &self,
        remote_path: &str,
        local_path: &Path,
        _token: &IdToken,
    ) -> Result<u64, StorageError> {
        self.fetches.write().await.push(remote_path.to_string());

        let Some(contents) = self.blob(remote_path).await else {
            return Err(StorageError::NotFound {
                path: remote_path.to_string(),
            });
        };

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        tokio::fs::write(local_path, &contents)
            .await
            .map_err(|e| StorageError::io(local_path, e))?;
        Ok(contents.len() as u64)
    }

    async fn publish(
        &self,
        local_path: &Path,
        remote_path: &str,
        token: &IdToken,
    ) -> Result<(), StorageError> {
        if self.failing_publishes.read().await.contains(remote_path) {
            return Err(StorageError::transfer(remote_path, "mock publish failure"));
        }

        let contents = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::io(local_path, e))?;

        self.blobs
            .write()
            .await
            .insert(remote_path.to_string(), contents.clone());
        self.publishes.write().await.push(RecordedPublish {
            remote_path: remote_path.to_string(),
            contents,
            token: token.expose().to_string(),
        });
        Ok(())
    }

    async fn remove(&self, remote_path: &str, _token: &IdToken) -> bool {
        self.removed.write().await.push(remote_path.to_string());
        self.blobs.write().await.remove(remote_path);
        true
    }
}
