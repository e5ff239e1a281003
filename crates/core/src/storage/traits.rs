//! Trait definitions for the storage module.

use async_trait::async_trait;
use std::path::Path;

use super::error::StorageError;
use crate::job::IdToken;

/// Moves blobs between the local workspace and remote storage.
///
/// Implementations do not retry; the caller decides what a failure means.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Downloads `remote_path` into `local_path`, returning the bytes written.
    ///
    /// The destination is replaced atomically: it either holds the complete
    /// blob or is left untouched.
    async fn fetch(
        &self,
        remote_path: &str,
        local_path: &Path,
        token: &IdToken,
    ) -> Result<u64, StorageError>;

    /// Uploads the contents of `local_path` to `remote_path`.
    async fn publish(
        &self,
        local_path: &Path,
        remote_path: &str,
        token: &IdToken,
    ) -> Result<(), StorageError>;

    /// Deletes `remote_path`, returning whether removal was confirmed.
    async fn remove(&self, remote_path: &str, token: &IdToken) -> bool;
}
