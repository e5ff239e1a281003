//! Queue message types.

use chrono::{DateTime, Utc};

/// A message currently leased by this worker.
///
/// The pop receipt changes on every renewal, so holders must keep the value
/// returned by the latest `renew`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedMessage {
    pub message_id: String,
    pub pop_receipt: String,
    /// How many times the message has been delivered, this lease included.
    pub dequeue_count: u32,
    /// Decoded message text.
    pub body: String,
    pub leased_at: DateTime<Utc>,
}
