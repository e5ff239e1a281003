//! Error types for the stage module.

use std::path::PathBuf;
use thiserror::Error;

use super::traits::Stage;

/// Errors that can occur while running a stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// Program could not be started.
    #[error("Failed to launch {stage} program {program:?}: {source}")]
    Launch {
        stage: Stage,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Program exited unsuccessfully. `code` is `None` when killed by a signal.
    #[error("{stage} {}", describe_exit(.code))]
    Exit { stage: Stage, code: Option<i32> },

    /// Program exited successfully but its expected output is missing or empty.
    #[error("{stage} produced no usable output at {path}: {reason}")]
    Postcondition {
        stage: Stage,
        path: PathBuf,
        reason: String,
    },

    /// Program ran past the configured timeout and was killed.
    #[error("{stage} timed out after {timeout_secs} seconds")]
    Timeout { stage: Stage, timeout_secs: u64 },

    /// I/O error while supervising the program.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {}", code),
        None => "was killed by signal".to_string(),
    }
}
