use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::dispatcher::DispatcherConfig;
use crate::queue::{MessageEncoding, QueueConfig};
use crate::stage::StagesConfig;
use crate::storage::StorageConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local working directory configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    /// Directory under which one sub-directory per job is created.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("results")
}

/// Remote path templates
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Remote path of the model asset; `{id_model}` is substituted.
    #[serde(default = "default_model_path")]
    pub model: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            model: default_model_path(),
        }
    }
}

impl PathsConfig {
    pub fn model_path(&self, id_model: &str) -> String {
        self.model.replace("{id_model}", id_model)
    }
}

fn default_model_path() -> String {
    "models/{id_model}".to_string()
}

/// Health and metrics endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9100))
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human readable format.
    #[serde(default)]
    pub json: bool,
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub queue: SanitizedQueueConfig,
    pub storage_endpoint: String,
    pub dispatcher: DispatcherConfig,
    pub workspace: WorkspaceConfig,
    pub paths: PathsConfig,
    pub stages: StagesConfig,
    pub metrics: MetricsConfig,
}

/// Sanitized queue config (SAS token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedQueueConfig {
    pub url: String,
    pub sas_token_configured: bool,
    pub visibility_timeout_secs: u64,
    pub renew_interval_secs: u64,
    pub max_delivery_attempts: u32,
    pub message_encoding: MessageEncoding,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            queue: SanitizedQueueConfig {
                url: config.queue.url.clone(),
                sas_token_configured: config
                    .queue
                    .sas_token
                    .as_deref()
                    .is_some_and(|t| !t.is_empty()),
                visibility_timeout_secs: config.queue.visibility_timeout_secs,
                renew_interval_secs: config.queue.renew_interval_secs,
                max_delivery_attempts: config.queue.max_delivery_attempts,
                message_encoding: config.queue.message_encoding,
            },
            storage_endpoint: config.storage.endpoint.clone(),
            dispatcher: config.dispatcher.clone(),
            workspace: config.workspace.clone(),
            paths: config.paths.clone(),
            stages: config.stages.clone(),
            metrics: config.metrics.clone(),
        }
    }
}
