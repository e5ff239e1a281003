//! Trait definitions for the stage module.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::StageError;

/// A pipeline stage backed by an external program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Render,
    Upscale,
    Compose,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::Upscale => "upscale",
            Self::Compose => "compose",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage must leave on disk to count as successful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// A regular, non-empty file.
    File(PathBuf),
    /// A directory with at least one entry.
    Directory(PathBuf),
}

impl Expectation {
    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) | Self::Directory(path) => path,
        }
    }

    /// Checks the postcondition, returning the reason it does not hold.
    pub async fn verify(&self) -> Result<(), String> {
        let metadata = tokio::fs::metadata(self.path())
            .await
            .map_err(|_| "does not exist".to_string())?;

        match self {
            Self::File(_) => {
                if !metadata.is_file() {
                    return Err("not a regular file".to_string());
                }
                if metadata.len() == 0 {
                    return Err("file is empty".to_string());
                }
            }
            Self::Directory(path) => {
                if !metadata.is_dir() {
                    return Err("not a directory".to_string());
                }
                let mut entries = tokio::fs::read_dir(path)
                    .await
                    .map_err(|e| format!("cannot list directory: {}", e))?;
                let first = entries
                    .next_entry()
                    .await
                    .map_err(|e| format!("cannot list directory: {}", e))?;
                if first.is_none() {
                    return Err("directory is empty".to_string());
                }
            }
        }
        Ok(())
    }
}

/// One fully resolved run of a stage program.
#[derive(Debug, Clone)]
pub struct StageInvocation {
    /// Job the stage runs for (log correlation only).
    pub job_id: String,
    pub stage: Stage,
    pub program: String,
    pub args: Vec<String>,
    pub expectation: Expectation,
    /// Kill the program if it runs longer than this.
    pub timeout: Option<Duration>,
}

/// Runs a stage program to completion and enforces its postcondition.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Runs the invocation, returning the wall-clock time the program took.
    async fn run(&self, invocation: &StageInvocation) -> Result<Duration, StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_expectation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.png");

        let expectation = Expectation::File(path.clone());
        assert_eq!(expectation.verify().await.unwrap_err(), "does not exist");

        std::fs::write(&path, b"").unwrap();
        assert_eq!(expectation.verify().await.unwrap_err(), "file is empty");

        std::fs::write(&path, b"png").unwrap();
        assert!(expectation.verify().await.is_ok());

        let on_dir = Expectation::File(dir.path().to_path_buf());
        assert_eq!(on_dir.verify().await.unwrap_err(), "not a regular file");
    }

    #[tokio::test]
    async fn test_directory_expectation() {
        let dir = TempDir::new().unwrap();
        let frames = dir.path().join("frames");

        let expectation = Expectation::Directory(frames.clone());
        assert_eq!(expectation.verify().await.unwrap_err(), "does not exist");

        std::fs::create_dir(&frames).unwrap();
        assert_eq!(expectation.verify().await.unwrap_err(), "directory is empty");

        std::fs::write(frames.join("0001.png"), b"frame").unwrap();
        assert!(expectation.verify().await.is_ok());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Render.to_string(), "render");
        assert_eq!(Stage::Compose.as_str(), "compose");
    }
}
