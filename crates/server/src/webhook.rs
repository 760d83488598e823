use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use secrecy::SecretString;
use tracing::{debug, error, info, warn};
use turnero_agent::{replies, BookingRuntime};
use turnero_core::domain::session::{InboundMessage, OutboundReply};
use turnero_whatsapp::events::{VerifyParams, ACK_BODY};
use turnero_whatsapp::{
    deliver, parse_webhook, verify_subscription, DeliveryOutcome, DeliveryPolicy, MessageSender,
    WhatsAppEvent,
};

#[derive(Clone)]
pub struct WebhookState {
    pub runtime: Arc<BookingRuntime>,
    pub sender: Arc<dyn MessageSender>,
    pub delivery: DeliveryPolicy,
    pub verify_token: SecretString,
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhook", get(verify).post(receive)).with_state(state)
}

pub async fn verify(
    State(state): State<WebhookState>,
    Query(params): Query<VerifyParams>,
) -> (StatusCode, String) {
    match verify_subscription(&params, &state.verify_token) {
        Ok(challenge) => {
            info!(
                event_name = "ingress.whatsapp.subscription_verified",
                correlation_id = "webhook-verify",
                "webhook subscription verified"
            );
            (StatusCode::OK, challenge)
        }
        Err(error) => {
            warn!(
                event_name = "ingress.whatsapp.subscription_rejected",
                correlation_id = "webhook-verify",
                error = %error,
                "webhook verification rejected"
            );
            (StatusCode::FORBIDDEN, "Forbidden".to_string())
        }
    }
}

/// Acknowledges the batch right away and processes its text messages in the
/// background, in arrival order.
pub async fn receive(
    State(state): State<WebhookState>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let events = match parse_webhook(&body) {
        Ok(events) => events,
        Err(error) => {
            warn!(
                event_name = "ingress.whatsapp.payload_rejected",
                correlation_id = "webhook",
                error = %error,
                "webhook payload could not be parsed"
            );
            return (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD");
        }
    };

    let mut messages = Vec::new();
    for event in events {
        match event {
            WhatsAppEvent::Text(message) => {
                info!(
                    event_name = "ingress.whatsapp.message_received",
                    correlation_id = message.message_id.as_deref().unwrap_or("unknown"),
                    from = %message.from.0,
                    "inbound text message"
                );
                messages.push(message);
            }
            WhatsAppEvent::Unsupported { message_id, from, kind } => {
                info!(
                    event_name = "ingress.whatsapp.unsupported_ignored",
                    correlation_id = %message_id,
                    from = %from.0,
                    kind = %kind,
                    "non-text message acknowledged and ignored"
                );
            }
            WhatsAppEvent::Status { message_id, status } => {
                debug!(
                    event_name = "ingress.whatsapp.status",
                    correlation_id = %message_id,
                    status = %status,
                    "delivery status update"
                );
            }
        }
    }

    if !messages.is_empty() {
        tokio::spawn(async move {
            for message in messages {
                process(&state, message).await;
            }
        });
    }

    (StatusCode::OK, ACK_BODY)
}

/// Runs one turn and delivers its reply. A failed turn still answers with a
/// generic apology so the user is never left without a response. `None`
/// means nothing was sent (a redelivered message).
pub async fn process(state: &WebhookState, message: InboundMessage) -> Option<DeliveryOutcome> {
    let correlation_id = message.message_id.clone().unwrap_or_else(|| "unknown".to_string());
    let from = message.from.clone();

    let reply = match state.runtime.handle(message).await {
        Ok(Some(report)) => report.reply,
        Ok(None) => return None,
        Err(error) => {
            error!(
                event_name = "conversation.turn.failed",
                correlation_id = %correlation_id,
                from = %from.0,
                error = %format!("{error:#}"),
                "turn failed; sending fallback reply"
            );
            OutboundReply { to: from, text: replies::temporary_failure() }
        }
    };

    let outcome = deliver(state.sender.as_ref(), &reply, &state.delivery, &correlation_id).await;
    if let DeliveryOutcome::Failed { attempts, error } = &outcome {
        warn!(
            event_name = "egress.whatsapp.delivery_failed",
            correlation_id = %correlation_id,
            attempts,
            error = %error,
            "reply could not be delivered"
        );
    }
    Some(outcome)
}
