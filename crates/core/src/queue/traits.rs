//! Trait definitions for the queue module.

use std::time::Duration;

use async_trait::async_trait;

use super::error::QueueError;
use super::types::LeasedMessage;

/// A queue of rendering requests with lease semantics.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Leases at most one message, hiding it from other consumers for `visibility`.
    async fn lease(&self, visibility: Duration) -> Result<Option<LeasedMessage>, QueueError>;

    /// Extends the lease. The returned message carries the new pop receipt.
    async fn renew(
        &self,
        message: &LeasedMessage,
        visibility: Duration,
    ) -> Result<LeasedMessage, QueueError>;

    /// Makes the message visible again immediately for redelivery.
    async fn release(&self, message: &LeasedMessage) -> Result<(), QueueError>;

    /// Removes the message from the queue for good.
    async fn delete(&self, message: &LeasedMessage) -> Result<(), QueueError>;
}
