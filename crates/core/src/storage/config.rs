//! Configuration for the storage gateway.

use serde::{Deserialize, Serialize};

/// Configuration for the SAS-URL storage gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base URL of the service issuing SAS URLs.
    pub endpoint: String,

    /// Timeout for a single HTTP request in seconds.
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

fn default_timeout() -> u64 {
    600
}

impl StorageConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout_secs: default_timeout(),
        }
    }
}
