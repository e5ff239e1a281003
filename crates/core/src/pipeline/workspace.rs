//! Job-scoped working directories.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::error::PipelineError;
use crate::job::RenderingRequest;

const ASSETS_DIR: &str = "assets";
const FRAMES_DIR: &str = "frames";

/// The directory `{root}/{id}/` holding every file of one job.
///
/// [`Workspace::remove`] deletes the directory on the normal path. If the
/// value is dropped without it (unwinding, a cancelled task) the directory is
/// removed synchronously in `Drop`.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    id: String,
    removed: bool,
}

impl Workspace {
    /// Creates a fresh workspace for `id` under `root`.
    ///
    /// Fails if `{root}/{id}` already exists: it may belong to a job that is
    /// still running. Leftovers from a previous process are cleared by
    /// [`prepare_workspace_root`] at startup.
    pub async fn create(root: &Path, id: &str) -> Result<Self, PipelineError> {
        let dir = root.join(id);
        let fail = |source| PipelineError::Workspace {
            path: dir.clone(),
            source,
        };

        tokio::fs::create_dir_all(root).await.map_err(fail)?;
        tokio::fs::create_dir(&dir).await.map_err(fail)?;

        // owned from here on, so a failure below still cleans up
        let workspace = Self {
            dir: dir.clone(),
            id: id.to_string(),
            removed: false,
        };
        tokio::fs::create_dir(workspace.assets_dir())
            .await
            .map_err(fail)?;
        tokio::fs::create_dir(workspace.frames_dir())
            .await
            .map_err(fail)?;

        debug!(job_id = id, path = %dir.display(), "Created workspace");
        Ok(workspace)
    }

    /// Deletes the directory without blocking the runtime.
    pub async fn remove(mut self) {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!(job_id = %self.id, "Removed workspace"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                job_id = %self.id,
                path = %self.dir.display(),
                error = %e,
                "Failed to remove workspace"
            ),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.dir.join(ASSETS_DIR)
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.dir.join(FRAMES_DIR)
    }

    /// Full request snapshot, token included. Never leaves the workspace.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.id))
    }

    /// Token-free snapshot that gets mirrored to remote storage.
    pub fn status_path(&self) -> PathBuf {
        self.dir.join(format!("{}.status.json", self.id))
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Local destination for a remote asset, named after its last path component.
    pub fn asset_path(&self, remote_path: &str, fallback: &str) -> PathBuf {
        let name = remote_path
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .unwrap_or(fallback);
        self.assets_dir().join(name)
    }

    /// Rewrites both snapshot files from the current request state.
    pub async fn write_snapshots(&self, request: &RenderingRequest) -> Result<(), PipelineError> {
        let full = serde_json::to_vec_pretty(request)?;
        let status = serde_json::to_vec_pretty(&request.status_snapshot())?;

        let snapshot_path = self.snapshot_path();
        tokio::fs::write(&snapshot_path, full)
            .await
            .map_err(|e| PipelineError::io(&snapshot_path, e))?;

        let status_path = self.status_path();
        tokio::fs::write(&status_path, status)
            .await
            .map_err(|e| PipelineError::io(&status_path, e))?;
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(job_id = %self.id, "Removed workspace"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                job_id = %self.id,
                path = %self.dir.display(),
                error = %e,
                "Failed to remove workspace"
            ),
        }
    }
}

/// Creates the workspace root and removes job directories left by a previous run.
///
/// Returns the number of stale directories removed.
pub async fn prepare_workspace_root(root: &Path) -> io::Result<usize> {
    tokio::fs::create_dir_all(root).await?;

    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "Removed stale job directory");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale job directory"),
        }
    }
    Ok(removed)
}
