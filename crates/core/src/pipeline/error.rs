//! Error types for the pipeline module.

use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobStatus;
use crate::stage::StageError;
use crate::storage::StorageError;

/// Why a job ended in `failed`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Job directory could not be prepared.
    #[error("Failed to prepare workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Request snapshot could not be encoded.
    #[error("Failed to encode request snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// Local file error outside of a stage or transfer.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Storage transfer failed while the job was in `step`.
    #[error("Storage error while {step}: {source}")]
    Storage {
        step: JobStatus,
        #[source]
        source: StorageError,
    },

    /// A stage program failed.
    #[error(transparent)]
    Stage(#[from] StageError),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
