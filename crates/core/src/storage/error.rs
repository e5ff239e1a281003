//! Error types for the storage module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while moving blobs.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Authorization was rejected for the blob path.
    #[error("Authorization rejected for {path}: HTTP {status}")]
    Auth { path: String, status: u16 },

    /// Blob does not exist.
    #[error("Blob not found: {path}")]
    NotFound { path: String },

    /// Transfer failed or was truncated.
    #[error("Transfer failed for {path}: {reason}")]
    Transfer { path: String, reason: String },

    /// Local file error.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn transfer(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transfer {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Maps a non-success HTTP status to the matching error kind.
    pub fn from_status(path: &str, status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth {
                path: path.to_string(),
                status,
            },
            404 => Self::NotFound {
                path: path.to_string(),
            },
            _ => Self::transfer(path, format!("HTTP {}", status)),
        }
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::NotFound { .. } => "not_found",
            Self::Transfer { .. } => "transfer",
            Self::Io { .. } => "io",
        }
    }
}
