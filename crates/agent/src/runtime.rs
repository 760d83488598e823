use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use turnero_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use turnero_core::booking::Notifier;
use turnero_core::clock::Clock;
use turnero_core::domain::reservation::Reservation;
use turnero_core::domain::session::{ChannelIdentity, InboundMessage, OutboundReply};
use turnero_core::flows::{ConversationState, TurnEffect};
use turnero_core::sessions::{SessionStore, SessionStoreError};
use uuid::Uuid;

use crate::machine::ConversationMachine;

const ACTOR: &str = "turnero-runtime";

/// What one processed inbound message produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReport {
    pub correlation_id: String,
    pub from: ConversationState,
    pub to: ConversationState,
    pub reply: OutboundReply,
    pub effects: Vec<TurnEffect>,
    /// Version now stored, or the loaded one when the write lost a race.
    pub session_version: u64,
    pub session_saved: bool,
}

/// Drives the conversation machine for inbound messages. Turns for the same
/// identity run one at a time; different identities run concurrently.
pub struct BookingRuntime {
    machine: ConversationMachine,
    sessions: Arc<dyn SessionStore>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    session_ttl: Duration,
    locks: Mutex<HashMap<ChannelIdentity, Arc<Mutex<()>>>>,
}

impl BookingRuntime {
    pub fn new(
        machine: ConversationMachine,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            machine,
            sessions,
            notifier,
            audit,
            clock,
            session_ttl,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Processes one inbound message. `Ok(None)` means the message was a
    /// redelivery of the last one handled and was dropped without a reply.
    pub async fn handle(&self, message: InboundMessage) -> Result<Option<TurnReport>> {
        let correlation_id =
            message.message_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        let lock = self.identity_lock(&message.from).await;
        let guard = lock.lock().await;
        let result = self.handle_serialized(&message, &correlation_id).await;
        drop(guard);
        drop(lock);
        self.release_idle_locks().await;

        if let Ok(Some(report)) = &result {
            for effect in &report.effects {
                if let TurnEffect::ReservationConfirmed { reservation, .. } = effect {
                    self.notify(reservation).await;
                }
            }
        }

        result
    }

    async fn identity_lock(&self, identity: &ChannelIdentity) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(identity.clone()).or_default().clone()
    }

    async fn release_idle_locks(&self) {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    async fn handle_serialized(
        &self,
        message: &InboundMessage,
        correlation_id: &str,
    ) -> Result<Option<TurnReport>> {
        let context = AuditContext::new(Some(message.from.0.clone()), correlation_id, ACTOR);
        let now = self.clock.now();
        let mut session = self
            .sessions
            .load(&message.from, now)
            .await
            .with_context(|| format!("failed to load session for `{}`", message.from.0))?;

        if session.is_replay(message.message_id.as_deref()) {
            info!(
                event_name = "conversation.message.replay_dropped",
                correlation_id,
                state = session.state.as_str(),
                "dropping redelivered message"
            );
            self.audit.emit(context.event(
                None,
                "conversation.message.replayed",
                AuditCategory::Ingress,
                AuditOutcome::Rejected,
            ));
            return Ok(None);
        }

        let previous_state = session.state;
        if session.expire_if_idle(now, self.session_ttl) {
            info!(
                event_name = "conversation.session.expired",
                correlation_id,
                previous_state = previous_state.as_str(),
                state = session.state.as_str(),
                "idle session reset"
            );
        }

        let outcome = self.machine.transition(&session, &message.text).await;
        session.apply(outcome.to, &outcome.patch);
        session.last_message_id = message.message_id.clone();
        session.updated_at = now;

        let (session_version, session_saved) = match self.sessions.save(&session).await {
            Ok(stored) => (stored.version, true),
            Err(error) => {
                let stale = matches!(error, SessionStoreError::Stale { .. });
                warn!(
                    event_name = "conversation.session.save_failed",
                    correlation_id,
                    stale,
                    error = %error,
                    "session not saved; reply is still sent"
                );
                self.audit.emit(
                    context
                        .event(
                            None,
                            "conversation.session.save_failed",
                            AuditCategory::Persistence,
                            AuditOutcome::Failed,
                        )
                        .with_metadata("stale", stale.to_string()),
                );
                (session.version, false)
            }
        };

        info!(
            event_name = "conversation.turn.completed",
            correlation_id,
            from_state = outcome.from.as_str(),
            to_state = outcome.to.as_str(),
            effects = outcome.effects.len(),
            session_version,
            "turn completed"
        );
        self.audit.emit(
            context
                .event(
                    None,
                    "conversation.turn.completed",
                    AuditCategory::Conversation,
                    AuditOutcome::Success,
                )
                .with_metadata("from_state", outcome.from.as_str())
                .with_metadata("to_state", outcome.to.as_str()),
        );
        for effect in &outcome.effects {
            self.record_effect(&context, effect);
        }

        Ok(Some(TurnReport {
            correlation_id: correlation_id.to_owned(),
            from: outcome.from,
            to: outcome.to,
            reply: OutboundReply { to: message.from.clone(), text: outcome.reply },
            effects: outcome.effects,
            session_version,
            session_saved,
        }))
    }

    fn record_effect(&self, context: &AuditContext, effect: &TurnEffect) {
        let event = match effect {
            TurnEffect::ClientRegistered { client_id } => context
                .event(
                    None,
                    "conversation.client.registered",
                    AuditCategory::Conversation,
                    AuditOutcome::Success,
                )
                .with_metadata("client_id", client_id.as_str()),
            TurnEffect::ReservationConfirmed { reservation, soft_limit_breached } => context
                .event(
                    Some(reservation.code.clone()),
                    "booking.reservation.confirmed",
                    AuditCategory::Booking,
                    AuditOutcome::Success,
                )
                .with_metadata("party_size", reservation.party_size.to_string())
                .with_metadata("table_capacity", reservation.table_capacity.to_string())
                .with_metadata("soft_limit_breached", soft_limit_breached.to_string()),
            TurnEffect::ReservationModified { reservation, soft_limit_breached } => context
                .event(
                    Some(reservation.code.clone()),
                    "booking.reservation.modified",
                    AuditCategory::Booking,
                    AuditOutcome::Success,
                )
                .with_metadata("party_size", reservation.party_size.to_string())
                .with_metadata("soft_limit_breached", soft_limit_breached.to_string()),
            TurnEffect::ReservationCancelled { reservation } => context.event(
                Some(reservation.code.clone()),
                "booking.reservation.cancelled",
                AuditCategory::Booking,
                AuditOutcome::Success,
            ),
            TurnEffect::Rejected { reason } => context
                .event(
                    None,
                    "booking.reservation.rejected",
                    AuditCategory::Booking,
                    AuditOutcome::Rejected,
                )
                .with_metadata("reason", *reason),
            TurnEffect::Recovered { error_class } => context
                .event(
                    None,
                    "conversation.turn.recovered",
                    AuditCategory::System,
                    AuditOutcome::Failed,
                )
                .with_metadata("error_class", *error_class),
        };
        self.audit.emit(event);
    }

    /// Best effort and outside the identity lock: a failed notice is logged and
    /// never undoes the booking.
    async fn notify(&self, reservation: &Reservation) {
        let client = match self.machine.clients().find(&reservation.client_id).await {
            Ok(Some(client)) => client,
            Ok(None) => {
                warn!(
                    event_name = "booking.notification.skipped",
                    reservation_code = %reservation.code,
                    "no client record for confirmation notice"
                );
                return;
            }
            Err(error) => {
                warn!(
                    event_name = "booking.notification.failed",
                    reservation_code = %reservation.code,
                    error = %error,
                    "could not load client for confirmation notice"
                );
                return;
            }
        };

        if let Err(error) = self.notifier.reservation_confirmed(&client, reservation).await {
            warn!(
                event_name = "booking.notification.failed",
                reservation_code = %reservation.code,
                error = %error,
                "confirmation notice failed"
            );
        }
    }
}
