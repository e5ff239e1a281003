pub mod config;
pub mod dispatcher;
pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod stage;
pub mod storage;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStatus, LeasePolicy};
pub use job::{IdToken, JobStatus, RenderKind, RenderingRequest, RenderingSettings};
pub use pipeline::{JobOutcome, PipelineConfig, PipelineController, PipelineError};
pub use queue::{AzureQueue, JobQueue, LeaseKeeper, LeasedMessage, QueueConfig, QueueError};
pub use stage::{ProcessStageExecutor, Stage, StageError, StageExecutor};
pub use storage::{SasStorageGateway, StorageConfig, StorageError, StorageGateway};
