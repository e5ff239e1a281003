//! Pipeline controller implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::job::{JobStatus, RenderKind, RenderingRequest};
use crate::metrics;
use crate::stage::{Expectation, Stage, StageCommand, StageExecutor, StageInvocation, TemplateVars};
use crate::storage::StorageGateway;

use super::error::PipelineError;
use super::types::{JobOutcome, PipelineConfig};
use super::workspace::Workspace;

/// Mutable state of one job while it runs.
struct JobRun {
    request: RenderingRequest,
    history: Vec<JobStatus>,
    stage_durations: Vec<(Stage, Duration)>,
}

/// Drives one rendering request to a terminal status.
///
/// The controller is the only writer of the request it runs. It never
/// retries a stage; a failed job is reported and redelivery is left to the
/// queue.
pub struct PipelineController {
    storage: Arc<dyn StorageGateway>,
    executor: Arc<dyn StageExecutor>,
    config: PipelineConfig,
}

impl PipelineController {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        executor: Arc<dyn StageExecutor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            storage,
            executor,
            config,
        }
    }

    /// Runs the job to `done` or `failed`. The workspace is gone when this returns.
    pub async fn run(&self, request: RenderingRequest) -> JobOutcome {
        let started_at = Utc::now();
        let mut run = JobRun {
            request,
            history: Vec::new(),
            stage_durations: Vec::new(),
        };
        let id = run.request.id.clone();
        info!(
            job_id = %id,
            id_model = %run.request.id_model,
            kind = run.request.settings.kind.as_str(),
            "Starting job"
        );

        let (workspace, result) = match Workspace::create(&self.config.work_root, &id).await {
            Ok(ws) => {
                let result = self.drive(&mut run, &ws).await;
                (Some(ws), result)
            }
            Err(e) => (None, Err(e)),
        };

        let (status, result_path, error) = match result {
            Ok(remote_path) => (JobStatus::Done, Some(remote_path), None),
            Err(e) => {
                error!(job_id = %id, step = %run.request.status, error = %e, "Job failed");
                if run.request.status == JobStatus::Publishing {
                    self.retract_result(&run.request).await;
                }
                (JobStatus::Failed, None, Some(e.to_string()))
            }
        };
        self.transition(&mut run, workspace.as_ref(), status).await;
        if let Some(workspace) = workspace {
            workspace.remove().await;
        }

        let outcome = JobOutcome {
            id,
            status,
            history: run.history,
            result_path,
            stage_durations: run.stage_durations,
            error,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            job_id = %outcome.id,
            status = %outcome.status,
            elapsed_secs = outcome.duration().as_secs_f64(),
            "Job finished"
        );
        outcome
    }

    /// Runs every step up to and including publishing, returning the result path.
    async fn drive(&self, run: &mut JobRun, ws: &Workspace) -> Result<String, PipelineError> {
        ws.write_snapshots(&run.request).await?;

        // fetching
        self.transition(run, Some(ws), JobStatus::Fetching).await;
        let model_path = self.config.paths.model_path(&run.request.id_model);
        let asset_path = ws.asset_path(&model_path, &run.request.id_model);
        let bytes = self
            .storage
            .fetch(&model_path, &asset_path, &run.request.id_token)
            .await
            .map_err(|source| PipelineError::Storage {
                step: JobStatus::Fetching,
                source,
            })?;
        debug!(job_id = %run.request.id, remote_path = %model_path, bytes, "Fetched model asset");

        let output_path = ws.output_path(&run.request.result_file_name());
        let vars = template_vars(&run.request, ws, &asset_path, &output_path);

        // rendering
        self.transition(run, Some(ws), JobStatus::Rendering).await;
        let render = self.config.stages.render.clone();
        self.run_stage(
            run,
            Stage::Render,
            &render,
            &vars,
            Expectation::Directory(ws.frames_dir()),
        )
        .await?;

        // upscaling or composing
        let (status, stage, command) = match run.request.settings.kind {
            RenderKind::Image => (
                JobStatus::Upscaling,
                Stage::Upscale,
                self.config.stages.upscale.clone(),
            ),
            RenderKind::Video => (
                JobStatus::Composing,
                Stage::Compose,
                self.config.stages.compose.clone(),
            ),
        };
        self.transition(run, Some(ws), status).await;
        self.run_stage(
            run,
            stage,
            &command,
            &vars,
            Expectation::File(output_path.clone()),
        )
        .await?;

        // publishing
        self.transition(run, Some(ws), JobStatus::Publishing).await;
        let remote_path = run.request.result_remote_path();
        self.storage
            .publish(&output_path, &remote_path, &run.request.id_token)
            .await
            .map_err(|source| PipelineError::Storage {
                step: JobStatus::Publishing,
                source,
            })?;
        info!(job_id = %run.request.id, remote_path = %remote_path, "Published result");

        Ok(remote_path)
    }

    async fn run_stage(
        &self,
        run: &mut JobRun,
        stage: Stage,
        command: &StageCommand,
        vars: &TemplateVars,
        expectation: Expectation,
    ) -> Result<(), PipelineError> {
        let invocation = StageInvocation {
            job_id: run.request.id.clone(),
            stage,
            program: command.program.clone(),
            args: command.expand_args(vars),
            expectation,
            timeout: self.config.stages.timeout(),
        };

        match self.executor.run(&invocation).await {
            Ok(elapsed) => {
                metrics::record_stage(stage.as_str(), Some(elapsed));
                run.stage_durations.push((stage, elapsed));
                Ok(())
            }
            Err(e) => {
                metrics::record_stage(stage.as_str(), None);
                Err(e.into())
            }
        }
    }

    /// Records a status change, rewrites the local snapshots and mirrors the
    /// token-free one. Mirroring is best-effort.
    async fn transition(&self, run: &mut JobRun, ws: Option<&Workspace>, status: JobStatus) {
        run.request.status = status;
        run.history.push(status);
        info!(job_id = %run.request.id, status = %status, "Job status changed");

        let Some(ws) = ws else {
            return;
        };
        if let Err(e) = ws.write_snapshots(&run.request).await {
            warn!(job_id = %run.request.id, error = %e, "Failed to persist request snapshot");
            return;
        }
        if let Err(e) = self
            .storage
            .publish(
                &ws.status_path(),
                &run.request.snapshot_remote_path(),
                &run.request.id_token,
            )
            .await
        {
            warn!(job_id = %run.request.id, status = %status, error = %e, "Failed to publish status snapshot");
        }
    }

    /// Deletes a possibly partial artifact after a failed publish.
    async fn retract_result(&self, request: &RenderingRequest) {
        let remote_path = request.result_remote_path();
        if self.storage.remove(&remote_path, &request.id_token).await {
            info!(job_id = %request.id, remote_path = %remote_path, "Removed partial result");
        } else {
            debug!(job_id = %request.id, remote_path = %remote_path, "No partial result removed");
        }
    }
}

fn template_vars(
    request: &RenderingRequest,
    ws: &Workspace,
    asset_path: &Path,
    output_path: &Path,
) -> TemplateVars {
    let settings = &request.settings;
    let mut vars = TemplateVars::new();
    vars.set("id", request.id.as_str())
        .set("id_model", request.id_model.as_str())
        .set("workspace", ws.path().display().to_string())
        .set("request", ws.snapshot_path().display().to_string())
        .set("asset", asset_path.display().to_string())
        .set("frames", ws.frames_dir().display().to_string())
        .set("output", output_path.display().to_string())
        .set("kind", settings.kind.as_str())
        .set("flyby", settings.flyby.to_string())
        .set("scene_effect", settings.scene_effect.to_string())
        .set("post_effect", settings.post_effect.to_string())
        .set("duration", settings.duration.to_string())
        .set("start_frame", settings.start_frame.to_string());
    vars
}
