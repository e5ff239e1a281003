//! Stage executor that runs programs as child processes.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::StageError;
use super::traits::{Stage, StageExecutor, StageInvocation};

/// Runs stage programs directly, without a shell.
#[derive(Debug, Clone, Default)]
pub struct ProcessStageExecutor;

impl ProcessStageExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Forwards each output line to the log as soon as it is read.
///
/// Bytes are read raw so a program emitting invalid UTF-8 is still drained
/// and never blocks on a full pipe.
async fn forward_lines<R>(reader: Option<R>, job_id: &str, stage: Stage, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                match stream {
                    OutputStream::Stdout => info!(job_id, stage = %stage, "{}", line),
                    OutputStream::Stderr => warn!(job_id, stage = %stage, "{}", line),
                }
            }
            Err(e) => {
                debug!(job_id, stage = %stage, error = %e, "Stopped reading stage output");
                break;
            }
        }
    }
}

#[async_trait]
impl StageExecutor for ProcessStageExecutor {
    async fn run(&self, invocation: &StageInvocation) -> Result<Duration, StageError> {
        let stage = invocation.stage;
        let job_id = invocation.job_id.as_str();

        info!(
            job_id,
            stage = %stage,
            program = %invocation.program,
            "Starting stage process"
        );
        let start = Instant::now();

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StageError::Launch {
                stage,
                program: invocation.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let supervise = async {
            futures::future::join(
                forward_lines(stdout, job_id, stage, OutputStream::Stdout),
                forward_lines(stderr, job_id, stage, OutputStream::Stderr),
            )
            .await;
            child.wait().await
        };

        let status = match invocation.timeout {
            Some(limit) => {
                let result = timeout(limit, supervise).await;
                match result {
                    Ok(status) => status?,
                    Err(_) => {
                        let _ = child.kill().await;
                        return Err(StageError::Timeout {
                            stage,
                            timeout_secs: limit.as_secs(),
                        });
                    }
                }
            }
            None => supervise.await?,
        };

        let elapsed = start.elapsed();
        info!(
            job_id,
            stage = %stage,
            exit_code = ?status.code(),
            elapsed_secs = elapsed.as_secs_f64(),
            "Stage process exited"
        );

        if !status.success() {
            return Err(StageError::Exit {
                stage,
                code: status.code(),
            });
        }

        if let Err(reason) = invocation.expectation.verify().await {
            return Err(StageError::Postcondition {
                stage,
                path: invocation.expectation.path().to_path_buf(),
                reason,
            });
        }

        Ok(elapsed)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::stage::Expectation;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn shell(script: &str, expectation: Expectation) -> StageInvocation {
        StageInvocation {
            job_id: "job-1".to_string(),
            stage: Stage::Render,
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                script.to_string(),
                expectation.path().to_string_lossy().to_string(),
            ],
            expectation,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_success_with_file_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("abc.png");
        let invocation = shell(
            r#"echo "rendering"; printf data > "$0""#,
            Expectation::File(output.clone()),
        );

        let elapsed = ProcessStageExecutor::new().run(&invocation).await.unwrap();
        assert!(elapsed < Duration::from_secs(30));
        assert_eq!(std::fs::read_to_string(output).unwrap(), "data");
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let dir = TempDir::new().unwrap();
        let invocation = shell(
            r#"echo "bad scene" >&2; exit 3"#,
            Expectation::File(dir.path().join("abc.png")),
        );

        let err = ProcessStageExecutor::new()
            .run(&invocation)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Exit {
                stage: Stage::Render,
                code: Some(3)
            }
        ));
    }

    #[tokio::test]
    async fn test_exit_zero_without_output_is_postcondition_error() {
        let dir = TempDir::new().unwrap();
        let invocation = shell("exit 0", Expectation::File(dir.path().join("abc.png")));

        let err = ProcessStageExecutor::new()
            .run(&invocation)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Postcondition { .. }));
    }

    #[tokio::test]
    async fn test_empty_frame_directory_is_postcondition_error() {
        let dir = TempDir::new().unwrap();
        let frames = dir.path().join("frames");
        let invocation = shell(r#"mkdir -p "$0""#, Expectation::Directory(frames));

        let err = ProcessStageExecutor::new()
            .run(&invocation)
            .await
            .unwrap_err();
        match err {
            StageError::Postcondition { reason, .. } => assert_eq!(reason, "directory is empty"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_frame_directory_with_frames() {
        let dir = TempDir::new().unwrap();
        let frames = dir.path().join("frames");
        let invocation = shell(
            r#"mkdir -p "$0" && printf f > "$0/0001.png" && printf f > "$0/0002.png""#,
            Expectation::Directory(frames),
        );

        assert!(ProcessStageExecutor::new().run(&invocation).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let invocation = StageInvocation {
            job_id: "job-1".to_string(),
            stage: Stage::Upscale,
            program: "/nonexistent/upscaler".to_string(),
            args: vec![],
            expectation: Expectation::File(PathBuf::from("/nonexistent/out.png")),
            timeout: None,
        };

        let err = ProcessStageExecutor::new()
            .run(&invocation)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Launch {
                stage: Stage::Upscale,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let mut invocation = shell("sleep 10", Expectation::File(dir.path().join("x")));
        invocation.timeout = Some(Duration::from_millis(200));

        let start = Instant::now();
        let err = ProcessStageExecutor::new()
            .run(&invocation)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_heavy_output_on_both_streams_does_not_block() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.png");
        let invocation = shell(
            r#"i=0; while [ $i -lt 3000 ]; do echo "frame $i"; echo "warn $i" >&2; i=$((i+1)); done; printf x > "$0""#,
            Expectation::File(output),
        );

        assert!(ProcessStageExecutor::new().run(&invocation).await.is_ok());
    }
}
