//! Types for the pipeline module.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{Config, PathsConfig};
use crate::job::JobStatus;
use crate::stage::{Stage, StagesConfig};

/// Settings a pipeline controller needs from the worker configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory under which job workspaces are created.
    pub work_root: PathBuf,
    pub paths: PathsConfig,
    pub stages: StagesConfig,
}

impl PipelineConfig {
    pub fn new(work_root: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
            paths: PathsConfig::default(),
            stages: StagesConfig::default(),
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            work_root: config.workspace.root.clone(),
            paths: config.paths.clone(),
            stages: config.stages.clone(),
        }
    }
}

/// What happened to one job, reported back to the dispatcher.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub id: String,
    /// Terminal status, `done` or `failed`.
    pub status: JobStatus,
    /// Every status the job went through, in order.
    pub history: Vec<JobStatus>,
    /// Remote path of the published artifact.
    pub result_path: Option<String>,
    pub stage_durations: Vec<(Stage, Duration)>,
    /// Failure reason when `status` is `failed`.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Done
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}
