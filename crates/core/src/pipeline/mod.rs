//! Per-job pipeline.
//!
//! A [`PipelineController`] drives one rendering request through
//! `fetching → rendering → upscaling|composing → publishing → done`, falling
//! to `failed` from any step. Each transition is persisted in the job's
//! [`Workspace`] and mirrored to storage without the id token.

mod controller;
mod error;
mod types;
mod workspace;

pub use controller::PipelineController;
pub use error::PipelineError;
pub use types::{JobOutcome, PipelineConfig};
pub use workspace::{prepare_workspace_root, Workspace};
