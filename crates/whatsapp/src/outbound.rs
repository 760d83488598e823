use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use turnero_core::domain::session::OutboundReply;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("outbound request could not be sent: {0}")]
    Connect(String),
    #[error("graph api rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("graph api is unavailable (status {status})")]
    Unavailable { status: u16 },
    #[error("outbound request timed out")]
    Timeout,
}

impl TransportError {
    /// Whether another attempt could succeed. A timeout is not retried since
    /// the first request may already have been delivered.
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Unavailable { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            attempt_timeout: Duration::from_secs(10),
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

impl DeliveryPolicy {
    pub fn new(max_retries: u32, attempt_timeout: Duration) -> Self {
        Self { max_retries, attempt_timeout, ..Self::default() }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// The request timed out; the reply may or may not have reached the user.
    Unknown { attempts: u32 },
    Failed { attempts: u32, error: TransportError },
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, reply: &OutboundReply) -> Result<(), TransportError>;
}

/// Sends through `POST {graph_base_url}/{phone_number_id}/messages`.
pub struct CloudApiSender {
    client: reqwest::Client,
    graph_base_url: String,
    phone_number_id: String,
    access_token: SecretString,
}

impl CloudApiSender {
    pub fn new(
        graph_base_url: impl Into<String>,
        phone_number_id: impl Into<String>,
        access_token: SecretString,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        Ok(Self {
            client,
            graph_base_url: graph_base_url.into().trim_end_matches('/').to_string(),
            phone_number_id: phone_number_id.into(),
            access_token,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.graph_base_url, self.phone_number_id)
    }
}

#[async_trait]
impl MessageSender for CloudApiSender {
    async fn send_text(&self, reply: &OutboundReply) -> Result<(), TransportError> {
        let body = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": reply.to.0,
            "type": "text",
            "text": { "preview_url": false, "body": reply.text },
        });

        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(self.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Connect(error.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(TransportError::Unavailable { status: status.as_u16() });
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected { status: status.as_u16(), body })
    }
}

/// Logs replies instead of sending them. Used when WhatsApp delivery is off.
#[derive(Default)]
pub struct LogSender;

#[async_trait]
impl MessageSender for LogSender {
    async fn send_text(&self, reply: &OutboundReply) -> Result<(), TransportError> {
        info!(
            event_name = "egress.whatsapp.reply_logged",
            to = %reply.to.0,
            text = %reply.text,
            "whatsapp delivery disabled; reply logged"
        );
        Ok(())
    }
}

/// Sends one reply with a per-attempt timeout and exponential backoff between
/// retryable failures. Never returns an error: the caller only learns how
/// delivery ended.
pub async fn deliver(
    sender: &dyn MessageSender,
    reply: &OutboundReply,
    policy: &DeliveryPolicy,
    correlation_id: &str,
) -> DeliveryOutcome {
    let mut attempt = 0;
    loop {
        let attempts = attempt + 1;
        let result = match tokio::time::timeout(policy.attempt_timeout, sender.send_text(reply))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        match result {
            Ok(()) => {
                debug!(
                    event_name = "egress.whatsapp.delivered",
                    correlation_id,
                    attempts,
                    "reply delivered"
                );
                return DeliveryOutcome::Delivered { attempts };
            }
            Err(TransportError::Timeout) => {
                warn!(
                    event_name = "egress.whatsapp.delivery_unknown",
                    correlation_id,
                    attempts,
                    "reply delivery timed out"
                );
                return DeliveryOutcome::Unknown { attempts };
            }
            Err(error) if error.is_retryable() && attempt < policy.max_retries => {
                warn!(
                    event_name = "egress.whatsapp.retrying",
                    correlation_id,
                    attempts,
                    max_retries = policy.max_retries,
                    error = %error,
                    "reply delivery failed; retrying"
                );
                let delay = policy.backoff(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(error) => {
                warn!(
                    event_name = "egress.whatsapp.failed",
                    correlation_id,
                    attempts,
                    error = %error,
                    "reply delivery failed"
                );
                return DeliveryOutcome::Failed { attempts, error };
            }
        }
    }
}
