//! Queue configuration.

use serde::{Deserialize, Serialize};

/// How message text is encoded on the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageEncoding {
    /// Message text is the JSON body itself.
    #[default]
    Plain,
    /// Message text is base64 of the JSON body (Azure SDK default).
    Base64,
}

/// Configuration for the Azure Storage queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue URL, e.g. `https://account.queue.core.windows.net/renders`.
    pub url: String,

    /// SAS query string appended to every request (without leading `?`).
    #[serde(default)]
    pub sas_token: Option<String>,

    /// How long a leased message stays invisible to other consumers.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// How often the lease of a running job is extended.
    /// Must be lower than `visibility_timeout_secs`.
    #[serde(default = "default_renew_interval")]
    pub renew_interval_secs: u64,

    /// Deliveries after which a failing message is deleted instead of released.
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    #[serde(default)]
    pub message_encoding: MessageEncoding,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_visibility_timeout() -> u64 {
    60
}

fn default_renew_interval() -> u64 {
    20
}

fn default_max_delivery_attempts() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    30
}

impl QueueConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sas_token: None,
            visibility_timeout_secs: default_visibility_timeout(),
            renew_interval_secs: default_renew_interval(),
            max_delivery_attempts: default_max_delivery_attempts(),
            message_encoding: MessageEncoding::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal() {
        let config: QueueConfig =
            toml::from_str(r#"url = "https://acct.queue.core.windows.net/renders""#).unwrap();
        assert_eq!(config.visibility_timeout_secs, 60);
        assert_eq!(config.renew_interval_secs, 20);
        assert_eq!(config.max_delivery_attempts, 3);
        assert_eq!(config.message_encoding, MessageEncoding::Plain);
        assert!(config.sas_token.is_none());
    }

    #[test]
    fn test_deserialize_base64_encoding() {
        let toml = r#"
            url = "https://acct.queue.core.windows.net/renders"
            sas_token = "sv=2022&sig=x"
            message_encoding = "base64"
            visibility_timeout_secs = 120
        "#;
        let config: QueueConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.message_encoding, MessageEncoding::Base64);
        assert_eq!(config.visibility_timeout_secs, 120);
        assert_eq!(config.sas_token.as_deref(), Some("sv=2022&sig=x"));
    }
}
