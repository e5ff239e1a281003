//! Mock stage executor for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::stage::{Expectation, Stage, StageError, StageExecutor, StageInvocation};

/// How a mocked stage should misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFailure {
    /// Program could not be started.
    Launch,
    /// Program exits with this code.
    Exit(i32),
    /// Program exits 0 without writing its output.
    NoOutput,
}

/// Mock implementation of the StageExecutor trait.
///
/// A successful run writes what the invocation expects: a frame file for a
/// `Directory` expectation, a small file for a `File` one. The postcondition
/// is then checked for real, so `StageFailure::NoOutput` surfaces exactly
/// like a renderer that silently produced nothing.
#[derive(Debug, Default)]
pub struct MockStageExecutor {
    invocations: Arc<RwLock<Vec<StageInvocation>>>,
    failures: Arc<RwLock<HashMap<Stage, StageFailure>>>,
    /// Simulated run time per stage, in milliseconds.
    run_duration_ms: Arc<RwLock<u64>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl MockStageExecutor {
    /// Create a mock executor where every stage succeeds instantly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every run of `stage` fail.
    pub async fn fail_stage(&self, stage: Stage, failure: StageFailure) {
        self.failures.write().await.insert(stage, failure);
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    /// Set the simulated duration of each stage run.
    pub async fn set_run_duration(&self, duration: Duration) {
        *self.run_duration_ms.write().await = duration.as_millis() as u64;
    }

    /// All invocations received, in order.
    pub async fn recorded_invocations(&self) -> Vec<StageInvocation> {
        self.invocations.read().await.clone()
    }

    /// Highest number of stage runs observed at the same time.
    pub fn max_concurrent_runs(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    async fn write_output(expectation: &Expectation) -> std::io::Result<()> {
        match expectation {
            Expectation::Directory(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                tokio::fs::write(dir.join("0001.png"), b"frame").await
            }
            Expectation::File(path) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(path, b"mock-output").await
            }
        }
    }
}

#[async_trait]
impl StageExecutor for MockStageExecutor {
    async fn run(&self, invocation: &StageInvocation) -> Result<Duration, StageError> {
        self.invocations.write().await.push(invocation.clone());
        let failure = self.failures.read().await.get(&invocation.stage).copied();

        if failure == Some(StageFailure::Launch) {
            return Err(StageError::Launch {
                stage: invocation.stage,
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock launch failure"),
            });
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let duration = Duration::from_millis(*self.run_duration_ms.read().await);
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        match failure {
            Some(StageFailure::Exit(code)) => {
                return Err(StageError::Exit {
                    stage: invocation.stage,
                    code: Some(code),
                })
            }
            Some(StageFailure::NoOutput) => {}
            _ => Self::write_output(&invocation.expectation).await?,
        }

        if let Err(reason) = invocation.expectation.verify().await {
            return Err(StageError::Postcondition {
                stage: invocation.stage,
                path: invocation.expectation.path().to_path_buf(),
                reason,
            });
        }
        Ok(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn invocation(stage: Stage, expectation: Expectation) -> StageInvocation {
        StageInvocation {
            job_id: "abc".to_string(),
            stage,
            program: "mock".to_string(),
            args: vec![],
            expectation,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_success_writes_expected_output() {
        let dir = TempDir::new().unwrap();
        let executor = MockStageExecutor::new();
        let frames = dir.path().join("frames");

        executor
            .run(&invocation(Stage::Render, Expectation::Directory(frames.clone())))
            .await
            .unwrap();
        assert!(frames.join("0001.png").exists());
        assert_eq!(executor.recorded_invocations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_output_is_postcondition_error() {
        let dir = TempDir::new().unwrap();
        let executor = MockStageExecutor::new();
        executor.fail_stage(Stage::Upscale, StageFailure::NoOutput).await;

        let err = executor
            .run(&invocation(
                Stage::Upscale,
                Expectation::File(dir.path().join("abc.png")),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Postcondition { .. }));
    }
}
