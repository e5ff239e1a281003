//! Mock job queue for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::job::RenderingRequest;
use crate::queue::{JobQueue, LeasedMessage, QueueError};

/// Something that happened to a message, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Leased(String),
    Renewed(String),
    Released(String),
    Deleted(String),
}

#[derive(Debug, Clone)]
struct PendingMessage {
    message_id: String,
    body: String,
    dequeue_count: u32,
}

/// Mock implementation of the JobQueue trait.
///
/// Messages are served FIFO. A released message goes back to the end of the
/// queue with its delivery count kept, like a real queue would redeliver it.
///
/// # Example
///
/// ```rust,ignore
/// use pixelq_core::testing::{fixtures, MockQueue, QueueEvent};
///
/// let queue = MockQueue::new();
/// let message_id = queue.push_request(&fixtures::image_request("abc", "m1")).await;
///
/// // ... run a dispatcher against it ...
///
/// assert!(queue.events().await.contains(&QueueEvent::Deleted(message_id)));
/// ```
#[derive(Debug, Default)]
pub struct MockQueue {
    pending: Arc<RwLock<VecDeque<PendingMessage>>>,
    events: Arc<RwLock<Vec<QueueEvent>>>,
    next_id: Arc<RwLock<u64>>,
    lease_calls: Arc<RwLock<usize>>,
    renewals: Arc<RwLock<u64>>,
    fail_leases: Arc<RwLock<usize>>,
    fail_renewals: Arc<RwLock<bool>>,
}

impl MockQueue {
    /// Create an empty mock queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw message body, returning its message id.
    pub async fn push_body(&self, body: impl Into<String>) -> String {
        self.push_with_count(body, 0).await
    }

    /// Enqueue a message that was already delivered `dequeue_count` times.
    pub async fn push_with_count(&self, body: impl Into<String>, dequeue_count: u32) -> String {
        let mut next_id = self.next_id.write().await;
        *next_id += 1;
        let message_id = format!("msg-{}", *next_id);

        self.pending.write().await.push_back(PendingMessage {
            message_id: message_id.clone(),
            body: body.into(),
            dequeue_count,
        });
        message_id
    }

    /// Enqueue a request serialized as JSON.
    pub async fn push_request(&self, request: &RenderingRequest) -> String {
        self.push_body(super::fixtures::request_json(request)).await
    }

    /// Make the next `count` lease calls fail.
    pub async fn fail_next_leases(&self, count: usize) {
        *self.fail_leases.write().await = count;
    }

    pub async fn set_fail_renewals(&self, fail: bool) {
        *self.fail_renewals.write().await = fail;
    }

    /// All recorded events.
    pub async fn events(&self) -> Vec<QueueEvent> {
        self.events.read().await.clone()
    }

    /// Recorded events without renewals.
    pub async fn settlement_events(&self) -> Vec<QueueEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| !matches!(e, QueueEvent::Renewed(_)))
            .cloned()
            .collect()
    }

    /// Number of lease calls, empty ones included.
    pub async fn lease_calls(&self) -> usize {
        *self.lease_calls.read().await
    }

    /// Number of successful renewals.
    pub async fn renewal_count(&self) -> u64 {
        *self.renewals.read().await
    }

    /// Messages still waiting to be leased.
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    async fn record(&self, event: QueueEvent) {
        self.events.write().await.push(event);
    }
}

#[async_trait]
impl JobQueue for MockQueue {
    async fn lease(&self, _visibility: Duration) -> Result<Option<LeasedMessage>, QueueError> {
        *self.lease_calls.write().await += 1;

        {
            let mut fail = self.fail_leases.write().await;
            if *fail > 0 {
                *fail -= 1;
                return Err(QueueError::Lease("mock lease failure".to_string()));
            }
        }

        let Some(pending) = self.pending.write().await.pop_front() else {
            return Ok(None);
        };
        self.record(QueueEvent::Leased(pending.message_id.clone()))
            .await;

        Ok(Some(LeasedMessage {
            pop_receipt: format!("{}-r0", pending.message_id),
            message_id: pending.message_id,
            dequeue_count: pending.dequeue_count + 1,
            body: pending.body,
            leased_at: Utc::now(),
        }))
    }

    async fn renew(
        &self,
        message: &LeasedMessage,
        _visibility: Duration,
    ) -> Result<LeasedMessage, QueueError> {
        if *self.fail_renewals.read().await {
            return Err(QueueError::Request("mock renewal failure".to_string()));
        }

        let mut renewals = self.renewals.write().await;
        *renewals += 1;
        let pop_receipt = format!("r{}", *renewals);
        drop(renewals);

        self.record(QueueEvent::Renewed(message.message_id.clone()))
            .await;
        Ok(LeasedMessage {
            pop_receipt,
            ..message.clone()
        })
    }

    async fn release(&self, message: &LeasedMessage) -> Result<(), QueueError> {
        self.record(QueueEvent::Released(message.message_id.clone()))
            .await;
        self.pending.write().await.push_back(PendingMessage {
            message_id: message.message_id.clone(),
            body: message.body.clone(),
            dequeue_count: message.dequeue_count,
        });
        Ok(())
    }

    async fn delete(&self, message: &LeasedMessage) -> Result<(), QueueError> {
        self.record(QueueEvent::Deleted(message.message_id.clone()))
            .await;
        Ok(())
    }
}
