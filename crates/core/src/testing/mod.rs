//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the queue, storage and stage
//! traits, so a whole worker can be exercised without Azure, Blender or
//! ffmpeg.
//!
//! # Example
//!
//! ```rust,ignore
//! use pixelq_core::testing::{fixtures, MockQueue, MockStageExecutor, MockStorage};
//!
//! let queue = MockQueue::new();
//! let storage = MockStorage::new();
//! let executor = MockStageExecutor::new();
//!
//! storage.seed_blob("models/m1", b"scene").await;
//! queue.push_request(&fixtures::image_request("abc", "m1")).await;
//! ```

mod mock_queue;
mod mock_stage;
mod mock_storage;

pub use mock_queue::{MockQueue, QueueEvent};
pub use mock_stage::{MockStageExecutor, StageFailure};
pub use mock_storage::{MockStorage, RecordedPublish};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::job::{IdToken, JobStatus, RenderKind, RenderingRequest, RenderingSettings};

    /// Token carried by every fixture request.
    pub const TOKEN: &str = "id-token-f00d";

    /// Create an image request with default settings.
    pub fn image_request(id: &str, id_model: &str) -> RenderingRequest {
        request(id, id_model, RenderKind::Image)
    }

    /// Create a flyby video request.
    pub fn video_request(id: &str, id_model: &str) -> RenderingRequest {
        let mut request = request(id, id_model, RenderKind::Video);
        request.settings.flyby = 1;
        request.settings.duration = 10;
        request
    }

    fn request(id: &str, id_model: &str, kind: RenderKind) -> RenderingRequest {
        RenderingRequest {
            id: id.to_string(),
            id_token: IdToken::new(TOKEN),
            id_model: id_model.to_string(),
            status: JobStatus::Queued,
            settings: RenderingSettings {
                kind,
                flyby: 0,
                scene_effect: 0,
                post_effect: 0,
                duration: 0,
                start_frame: 0,
            },
        }
    }

    /// Serialize a request the way it travels on the queue.
    pub fn request_json(request: &RenderingRequest) -> String {
        serde_json::to_string(request).unwrap_or_default()
    }
}
