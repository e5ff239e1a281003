//! Queue errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue could not be reached or refused the lease.
    #[error("failed to lease message: {0}")]
    Lease(String),

    /// The message body is not a valid rendering request.
    #[error("failed to deserialize message {message_id}: {reason}")]
    Deserialization { message_id: String, reason: String },

    /// The request parsed but carries unusable values.
    #[error("invalid request in message {message_id}: {reason}")]
    InvalidRequest { message_id: String, reason: String },

    /// HTTP request to the queue service failed.
    #[error("queue request failed: {0}")]
    Request(String),

    /// The queue service answered with something unexpected.
    #[error("queue protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for QueueError {
    fn from(e: reqwest::Error) -> Self {
        QueueError::Request(e.to_string())
    }
}
