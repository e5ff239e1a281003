//! Dispatcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::QueueConfig;

/// Configuration for the job dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of jobs processed at the same time.
    /// Overridden by `--num_process` on the command line.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// How often to poll the queue when a slot is free (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_poll_interval() -> u64 {
    10
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// How leased messages are held and settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    /// Invisibility window requested on lease and on every renewal.
    pub visibility: Duration,
    pub renew_interval: Duration,
    /// A failed job whose message was delivered this many times is deleted.
    pub max_delivery_attempts: u32,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            visibility: Duration::from_secs(60),
            renew_interval: Duration::from_secs(20),
            max_delivery_attempts: 3,
        }
    }
}

impl From<&QueueConfig> for LeasePolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            visibility: Duration::from_secs(config.visibility_timeout_secs),
            renew_interval: Duration::from_secs(config.renew_interval_secs),
            max_delivery_attempts: config.max_delivery_attempts,
        }
    }
}
