//! Types for the dispatcher.

use serde::{Deserialize, Serialize};

/// Current status of the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStatus {
    /// Whether the polling loop is running.
    pub running: bool,
    /// Jobs currently held by a pipeline controller.
    pub in_flight: usize,
    /// Upper bound on `in_flight`.
    pub max_concurrent_jobs: usize,
    /// Messages leased and started as jobs since startup.
    pub leased_total: u64,
    pub succeeded_total: u64,
    pub failed_total: u64,
    /// Messages deleted because they were not valid requests.
    pub poison_total: u64,
    /// Messages left leased because a job with the same id was running.
    pub deferred_total: u64,
}
