use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use turnero_core::domain::session::{ChannelIdentity, InboundMessage};

/// Body the webhook answers with once an event batch is accepted.
pub const ACK_BODY: &str = "EVENT_RECEIVED";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WhatsAppEvent {
    Text(InboundMessage),
    /// Media, stickers, locations and anything else without a text body.
    Unsupported { message_id: String, from: ChannelIdentity, kind: String },
    /// Delivery and read receipts for messages we sent.
    Status { message_id: String, status: String },
}

impl WhatsAppEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Unsupported { .. } => "unsupported",
            Self::Status { .. } => "status",
        }
    }
}

#[derive(Debug, Error)]
pub enum WebhookParseError {
    #[error("webhook body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected webhook object `{0}`")]
    UnexpectedObject(String),
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    object: String,
    #[serde(default)]
    entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntry {
    #[serde(default)]
    changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
struct WebhookChange {
    #[serde(default)]
    field: String,
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<WebhookMessage>,
    #[serde(default)]
    statuses: Vec<WebhookStatus>,
}

#[derive(Debug, Deserialize)]
struct WebhookMessage {
    id: String,
    from: String,
    #[serde(rename = "type")]
    kind: String,
    text: Option<TextBody>,
    interactive: Option<InteractiveBody>,
    button: Option<ButtonBody>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    body: String,
}

#[derive(Debug, Deserialize)]
struct InteractiveBody {
    button_reply: Option<ReplyOption>,
    list_reply: Option<ReplyOption>,
}

#[derive(Debug, Deserialize)]
struct ReplyOption {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ButtonBody {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WebhookStatus {
    id: String,
    status: String,
}

impl WebhookMessage {
    fn text(&self) -> Option<&str> {
        match self.kind.as_str() {
            "text" => self.text.as_ref().map(|text| text.body.as_str()),
            "interactive" => self.interactive.as_ref().and_then(|interactive| {
                interactive
                    .button_reply
                    .as_ref()
                    .or(interactive.list_reply.as_ref())
                    .map(|reply| reply.title.as_str())
            }),
            "button" => self.button.as_ref().map(|button| button.text.as_str()),
            _ => None,
        }
    }

    fn into_event(self) -> WhatsAppEvent {
        let from = ChannelIdentity(self.from.clone());
        match self.text().map(str::to_owned) {
            Some(text) => WhatsAppEvent::Text(InboundMessage {
                message_id: Some(self.id),
                from,
                text,
            }),
            None => WhatsAppEvent::Unsupported { message_id: self.id, from, kind: self.kind },
        }
    }
}

/// Flattens a Cloud API webhook body into events, in delivery order.
pub fn parse_webhook(body: &[u8]) -> Result<Vec<WhatsAppEvent>, WebhookParseError> {
    let payload: WebhookPayload = serde_json::from_slice(body)?;
    if payload.object != "whatsapp_business_account" {
        return Err(WebhookParseError::UnexpectedObject(payload.object));
    }

    let mut events = Vec::new();
    for change in payload.entry.into_iter().flat_map(|entry| entry.changes) {
        if change.field != "messages" {
            continue;
        }
        events.extend(change.value.messages.into_iter().map(WebhookMessage::into_event));
        events.extend(change.value.statuses.into_iter().map(|status| WhatsAppEvent::Status {
            message_id: status.id,
            status: status.status,
        }));
    }

    Ok(events)
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("hub.mode must be `subscribe`")]
    UnsupportedMode,
    #[error("hub.verify_token does not match the configured token")]
    TokenMismatch,
    #[error("hub.challenge is missing")]
    MissingChallenge,
}

/// Subscription handshake: echoes `hub.challenge` when the token matches.
pub fn verify_subscription(
    params: &VerifyParams,
    expected_token: &SecretString,
) -> Result<String, VerificationError> {
    if params.mode.as_deref() != Some("subscribe") {
        return Err(VerificationError::UnsupportedMode);
    }

    let expected = expected_token.expose_secret();
    let provided = params.verify_token.as_deref().unwrap_or_default();
    if expected.is_empty() || !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        return Err(VerificationError::TokenMismatch);
    }

    params.challenge.clone().ok_or(VerificationError::MissingChallenge)
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter().zip(right).fold(0_u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
