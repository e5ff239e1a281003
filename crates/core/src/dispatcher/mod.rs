//! Job dispatcher.
//!
//! Polls the queue on a fixed interval and hands each leased request to a
//! [`PipelineController`](crate::pipeline::PipelineController) in its own
//! task. A semaphore caps the number of jobs in flight; a slot is taken
//! before leasing, so no message is ever leased without capacity to run it.

mod config;
mod runner;
mod types;

pub use config::{DispatcherConfig, LeasePolicy};
pub use runner::Dispatcher;
pub use types::DispatcherStatus;
