//! Stage executor for external pipeline programs.
//!
//! A stage is one external process invocation (render, upscale or compose).
//! The executor streams the program's output to the log as it arrives, waits
//! for exit, and then checks the stage postcondition: renderers are known to
//! exit 0 without producing anything, so the exit code alone is not trusted.
//!
//! # Example
//!
//! ```ignore
//! use pixelq_core::stage::{Expectation, ProcessStageExecutor, Stage, StageExecutor, StageInvocation};
//!
//! let executor = ProcessStageExecutor::new();
//! let invocation = StageInvocation {
//!     job_id: "abc".to_string(),
//!     stage: Stage::Upscale,
//!     program: "python".to_string(),
//!     args: vec!["upscale.py".to_string(), "--output=/work/abc/abc.png".to_string()],
//!     expectation: Expectation::File(PathBuf::from("/work/abc/abc.png")),
//!     timeout: None,
//! };
//! let elapsed = executor.run(&invocation).await?;
//! ```

mod config;
mod error;
mod process;
mod template;
mod traits;

pub use config::{StageCommand, StagesConfig};
pub use error::StageError;
pub use process::ProcessStageExecutor;
pub use template::TemplateVars;
pub use traits::{Expectation, Stage, StageExecutor, StageInvocation};
