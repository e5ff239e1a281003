//! Render job descriptor and lifecycle status.
//!
//! A [`RenderingRequest`] is created when a queue message is leased and
//! deserialized, and is mutated only by the pipeline controller that owns it.

mod types;

pub use types::{
    validate_job_id, IdToken, JobStatus, RenderKind, RenderingRequest, RenderingSettings,
    RequestError, StatusSnapshot,
};
