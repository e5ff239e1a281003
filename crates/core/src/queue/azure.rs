//! Azure Storage queue client over the REST API.
//!
//! Only the four calls the worker needs are implemented: get one message,
//! update its visibility, and delete it. Responses are small, fixed-shape XML
//! documents, so fields are pulled out with regular expressions.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use reqwest::{Client, Response};
use tracing::{debug, warn};

use super::config::{MessageEncoding, QueueConfig};
use super::error::QueueError;
use super::traits::JobQueue;
use super::types::LeasedMessage;

const POP_RECEIPT_HEADER: &str = "x-ms-popreceipt";
const API_VERSION_HEADER: &str = "x-ms-version";
const API_VERSION: &str = "2021-08-06";

static MESSAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<QueueMessage>(.*?)</QueueMessage>").unwrap());
static MESSAGE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<MessageId>(.*?)</MessageId>").unwrap());
static POP_RECEIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<PopReceipt>(.*?)</PopReceipt>").unwrap());
static DEQUEUE_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<DequeueCount>\s*(\d+)\s*</DequeueCount>").unwrap());
static MESSAGE_TEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<MessageText>(.*?)</MessageText>").unwrap());

/// A message as it appears in a `QueueMessagesList` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawMessage {
    pub message_id: String,
    pub pop_receipt: String,
    pub dequeue_count: u32,
    pub text: String,
}

/// Parses the first message of a `QueueMessagesList` document.
///
/// Returns `Ok(None)` for an empty list.
pub(crate) fn parse_messages_list(xml: &str) -> Result<Option<RawMessage>, QueueError> {
    let Some(message) = MESSAGE_RE.captures(xml) else {
        if xml.contains("QueueMessagesList") || xml.trim().is_empty() {
            return Ok(None);
        }
        return Err(QueueError::Protocol(
            "response is not a QueueMessagesList".to_string(),
        ));
    };
    let message = message.get(1).map(|m| m.as_str()).unwrap_or_default();

    let field = |re: &Regex, name: &str| -> Result<String, QueueError> {
        re.captures(message)
            .and_then(|c| c.get(1))
            .map(|m| unescape_xml(m.as_str().trim()))
            .ok_or_else(|| QueueError::Protocol(format!("message is missing {}", name)))
    };

    let dequeue_count = field(&DEQUEUE_COUNT_RE, "DequeueCount")?
        .parse::<u32>()
        .map_err(|e| QueueError::Protocol(format!("invalid DequeueCount: {}", e)))?;

    Ok(Some(RawMessage {
        message_id: field(&MESSAGE_ID_RE, "MessageId")?,
        pop_receipt: field(&POP_RECEIPT_RE, "PopReceipt")?,
        dequeue_count,
        text: field(&MESSAGE_TEXT_RE, "MessageText")?,
    }))
}

/// Replaces the predefined XML entities and numeric character references.
pub(crate) fn unescape_xml(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];

        let Some(end) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };

        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decodes message text according to the configured encoding.
pub(crate) fn decode_text(
    message_id: &str,
    text: &str,
    encoding: MessageEncoding,
) -> Result<String, QueueError> {
    match encoding {
        MessageEncoding::Plain => Ok(text.to_string()),
        MessageEncoding::Base64 => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(text.trim())
                .map_err(|e| QueueError::Deserialization {
                    message_id: message_id.to_string(),
                    reason: format!("invalid base64: {}", e),
                })?;
            String::from_utf8(bytes).map_err(|e| QueueError::Deserialization {
                message_id: message_id.to_string(),
                reason: format!("invalid UTF-8: {}", e),
            })
        }
    }
}

/// Azure Storage queue accessed with a SAS token.
pub struct AzureQueue {
    client: Client,
    config: QueueConfig,
}

impl AzureQueue {
    /// Create a new queue client with the given configuration.
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    /// Appends the SAS token to an already started query string.
    fn with_sas(&self, mut url: String) -> String {
        if let Some(sas) = self.config.sas_token.as_deref() {
            let sas = sas.trim_start_matches('?');
            if !sas.is_empty() {
                url.push('&');
                url.push_str(sas);
            }
        }
        url
    }

    fn message_url(&self, message: &LeasedMessage, visibility: Option<Duration>) -> String {
        let mut url = format!(
            "{}/messages/{}?popreceipt={}",
            self.base_url(),
            urlencoding::encode(&message.message_id),
            urlencoding::encode(&message.pop_receipt)
        );
        if let Some(visibility) = visibility {
            url.push_str(&format!("&visibilitytimeout={}", visibility.as_secs()));
        }
        self.with_sas(url)
    }

    /// Sets the visibility timeout of a leased message, returning the new pop receipt.
    async fn update_visibility(
        &self,
        message: &LeasedMessage,
        visibility: Duration,
    ) -> Result<String, QueueError> {
        let response = self
            .client
            .put(self.message_url(message, Some(visibility)))
            .header(API_VERSION_HEADER, API_VERSION)
            .body(Vec::new())
            .send()
            .await?;
        let response = check_status("update message", response).await?;

        response
            .headers()
            .get(POP_RECEIPT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                QueueError::Protocol(format!("update response is missing {}", POP_RECEIPT_HEADER))
            })
    }
}

/// Turns a non-success response into an error carrying the status and body.
async fn check_status(operation: &str, response: Response) -> Result<Response, QueueError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(QueueError::Request(format!(
        "{} returned HTTP {}: {}",
        operation,
        status.as_u16(),
        body.trim()
    )))
}

#[async_trait]
impl JobQueue for AzureQueue {
    async fn lease(&self, visibility: Duration) -> Result<Option<LeasedMessage>, QueueError> {
        let url = self.with_sas(format!(
            "{}/messages?numofmessages=1&visibilitytimeout={}",
            self.base_url(),
            visibility.as_secs()
        ));

        let response = self
            .client
            .get(url)
            .header(API_VERSION_HEADER, API_VERSION)
            .send()
            .await
            .map_err(|e| QueueError::Lease(e.to_string()))?;
        let response = check_status("get messages", response)
            .await
            .map_err(|e| QueueError::Lease(e.to_string()))?;
        let xml = response
            .text()
            .await
            .map_err(|e| QueueError::Lease(e.to_string()))?;

        let Some(raw) = parse_messages_list(&xml)? else {
            return Ok(None);
        };
        debug!(
            message_id = %raw.message_id,
            dequeue_count = raw.dequeue_count,
            "Leased queue message"
        );

        // Undecodable text is passed through as-is; the dispatcher then
        // rejects it as poison instead of it cycling on the queue.
        let body = match decode_text(&raw.message_id, &raw.text, self.config.message_encoding) {
            Ok(body) => body,
            Err(e) => {
                warn!(message_id = %raw.message_id, error = %e, "Passing message text through undecoded");
                raw.text
            }
        };
        Ok(Some(LeasedMessage {
            message_id: raw.message_id,
            pop_receipt: raw.pop_receipt,
            dequeue_count: raw.dequeue_count,
            body,
            leased_at: Utc::now(),
        }))
    }

    async fn renew(
        &self,
        message: &LeasedMessage,
        visibility: Duration,
    ) -> Result<LeasedMessage, QueueError> {
        let pop_receipt = self.update_visibility(message, visibility).await?;
        Ok(LeasedMessage {
            pop_receipt,
            ..message.clone()
        })
    }

    async fn release(&self, message: &LeasedMessage) -> Result<(), QueueError> {
        self.update_visibility(message, Duration::ZERO).await?;
        Ok(())
    }

    async fn delete(&self, message: &LeasedMessage) -> Result<(), QueueError> {
        let response = self
            .client
            .delete(self.message_url(message, None))
            .header(API_VERSION_HEADER, API_VERSION)
            .send()
            .await?;
        check_status("delete message", response).await?;
        Ok(())
    }
}
