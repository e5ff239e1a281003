//! Job queue abstraction.
//!
//! Rendering requests arrive as messages on an Azure Storage queue. A message
//! is leased (hidden from other workers) for the lifetime of its job, kept
//! hidden by a [`LeaseKeeper`], and finally deleted or released depending on
//! the job outcome.

mod azure;
mod config;
mod error;
mod lease;
mod traits;
mod types;

pub use azure::AzureQueue;
pub use config::{MessageEncoding, QueueConfig};
pub use error::QueueError;
pub use lease::LeaseKeeper;
pub use traits::JobQueue;
pub use types::LeasedMessage;
