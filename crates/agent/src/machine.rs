use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info, warn};
use turnero_core::booking::{
    AllocationDecision, AllocationRequest, BookingService, ClientDirectory, GatewayError,
    RejectionReason,
};
use turnero_core::clock::{normalize_date, normalize_time, Clock};
use turnero_core::domain::client::{validate_email, Client, ClientId};
use turnero_core::domain::reservation::ReservationCode;
use turnero_core::domain::session::{ConversationSession, SessionPatch, WorkingData};
use turnero_core::domain::venue::VenueId;
use turnero_core::errors::{ApplicationError, ConflictKind, DomainError, Recovery};
use turnero_core::flows::{
    BookingFlow, ConversationState, FlowEngine, Handler, MenuChoice, TransitionOutcome,
    TurnEffect,
};
use turnero_core::intent::{BookingIntent, IntentResolver, InterpretedMessage};
use turnero_core::text::fold;

use crate::replies;

type S = ConversationState;

const SKIP_EMAIL: [&str; 5] = ["no", "omitir", "saltar", "ninguno", "no tengo"];

/// Turns one inbound text into a `TransitionOutcome`. Never fails: every error
/// is mapped to a reply and a next state through `ApplicationError::recovery`.
/// The session itself is not mutated here; the runtime applies the patch and
/// stores it.
pub struct ConversationMachine {
    engine: FlowEngine<BookingFlow>,
    booking: BookingService,
    clients: Arc<dyn ClientDirectory>,
    resolver: Arc<dyn IntentResolver>,
    clock: Arc<dyn Clock>,
    venue: VenueId,
}

impl ConversationMachine {
    pub fn new(
        booking: BookingService,
        clients: Arc<dyn ClientDirectory>,
        resolver: Arc<dyn IntentResolver>,
        clock: Arc<dyn Clock>,
        venue: VenueId,
    ) -> Self {
        Self { engine: FlowEngine::default(), booking, clients, resolver, clock, venue }
    }

    pub fn clients(&self) -> &Arc<dyn ClientDirectory> {
        &self.clients
    }

    pub async fn transition(
        &self,
        session: &ConversationSession,
        text: &str,
    ) -> TransitionOutcome {
        let from = session.state;
        let text = text.trim();
        let (input, handler) = self.engine.dispatch(from, text);
        debug!(
            event_name = "conversation.turn.dispatched",
            state = from.as_str(),
            input = ?input,
            handler = ?handler,
            "dispatching turn"
        );

        match (session.client_id.as_ref(), from.requires_client()) {
            (Some(client), true) => self.serve(session, client, handler, text).await,
            (None, true) => {
                let error = ApplicationError::Domain(DomainError::InvariantViolation(format!(
                    "state {} has no bound client",
                    from.as_str()
                )));
                recovered(from, S::AwaitId, SessionPatch::clear(), replies::welcome(), &error)
            }
            (_, false) => self.identify(session, handler, text).await,
        }
    }

    async fn identify(
        &self,
        session: &ConversationSession,
        handler: Handler,
        text: &str,
    ) -> TransitionOutcome {
        let from = session.state;
        match handler {
            Handler::Identify => self.lookup_client(from, text).await,
            Handler::RegisterName => self.register_client(session, text).await,
            Handler::RepromptIdentity => reprompt(S::AwaitId, replies::ask_identity_again()),
            _ => {
                TransitionOutcome::new(from, S::AwaitId, SessionPatch::clear(), replies::welcome())
            }
        }
    }

    async fn serve(
        &self,
        session: &ConversationSession,
        client: &ClientId,
        handler: Handler,
        text: &str,
    ) -> TransitionOutcome {
        let from = session.state;
        match handler {
            Handler::CaptureEmail => self.capture_email(from, client, text).await,
            Handler::ShowMenu => {
                TransitionOutcome::new(from, S::Menu, SessionPatch::clear(), replies::menu())
            }
            Handler::MenuShortcut(choice) => self.start(from, client, choice).await,
            Handler::ResolveIntent => self.resolve_intent(session, client, text).await,
            Handler::CaptureDate => self.capture_date(session, text),
            Handler::CaptureTime => self.capture_time(session, text),
            Handler::CapturePartySize => self.capture_party_size(session, text),
            Handler::ConfirmBooking => self.confirm_booking(session, client).await,
            Handler::RetryAfterConflict => {
                let mut patch = SessionPatch::clear();
                if let Some(code) = &session.working.reservation_code {
                    patch = patch.with_code(code.clone());
                }
                TransitionOutcome::new(from, S::AskDate, patch, replies::ask_date())
            }
            Handler::CaptureModifyCode => self.capture_code(from, client, text, S::AskDate).await,
            Handler::CaptureCancelCode => {
                self.capture_code(from, client, text, S::ConfirmCancel).await
            }
            Handler::ConfirmModify => self.confirm_modify(session, client).await,
            Handler::ConfirmCancel => self.confirm_cancel(session, client).await,
            Handler::Decline => {
                TransitionOutcome::new(from, S::Menu, SessionPatch::clear(), replies::declined())
            }
            Handler::Abandon => TransitionOutcome::new(
                from,
                S::Menu,
                SessionPatch::clear(),
                replies::back_to_menu(),
            ),
            Handler::Greet
            | Handler::Identify
            | Handler::RepromptIdentity
            | Handler::RegisterName => {
                TransitionOutcome::new(from, S::Menu, SessionPatch::clear(), replies::menu())
            }
        }
    }

    async fn lookup_client(&self, from: ConversationState, text: &str) -> TransitionOutcome {
        let Some(client_id) = ClientId::parse(text) else {
            return TransitionOutcome::new(
                from,
                S::AwaitId,
                SessionPatch::keep(),
                replies::ask_identity_again(),
            );
        };

        match self.clients.find(&client_id).await {
            Ok(Some(client)) if client.needs_email() => TransitionOutcome::new(
                from,
                S::AwaitEmail,
                SessionPatch::bind(client.id.clone()),
                replies::ask_email(client.first_name()),
            ),
            Ok(Some(client)) => TransitionOutcome::new(
                from,
                S::Menu,
                SessionPatch::bind(client.id.clone()),
                replies::welcome_back(client.first_name()),
            ),
            Ok(None) => TransitionOutcome::new(
                from,
                S::RegisterName,
                SessionPatch::clear().with_pending_client(client_id),
                replies::ask_name(),
            ),
            Err(error) => recovered(
                from,
                S::AwaitId,
                SessionPatch::keep(),
                replies::temporary_failure(),
                &ApplicationError::from(error),
            ),
        }
    }

    async fn register_client(
        &self,
        session: &ConversationSession,
        text: &str,
    ) -> TransitionOutcome {
        let from = session.state;
        let Some(pending) = session.working.pending_client.clone() else {
            return TransitionOutcome::new(
                from,
                S::AwaitId,
                SessionPatch::clear(),
                replies::welcome(),
            );
        };

        let now = self.clock.now();
        let registered = Client::register(pending.clone(), text, session.identity.as_str(), now);
        let candidate = match registered {
            Ok(candidate) => candidate,
            Err(_) => {
                return TransitionOutcome::new(
                    from,
                    from,
                    SessionPatch::keep(),
                    replies::ask_name_again(),
                )
            }
        };

        match self.clients.register(candidate).await {
            Ok(client) => {
                info!(
                    event_name = "conversation.client.registered",
                    client_id = %client.id.0,
                    "client registered"
                );
                TransitionOutcome::new(
                    from,
                    S::AwaitEmail,
                    SessionPatch::bind(client.id.clone()),
                    replies::ask_email(client.first_name()),
                )
                .with_effect(TurnEffect::ClientRegistered { client_id: client.id.0 })
            }
            // Registered from another session in the meantime: the key is
            // immutable, so binding to it is all that is left to do.
            Err(GatewayError::Conflict(_)) => {
                TransitionOutcome::new(from, S::Menu, SessionPatch::bind(pending), replies::menu())
            }
            Err(error) => recovered(
                from,
                from,
                SessionPatch::keep(),
                replies::temporary_failure(),
                &ApplicationError::from(error),
            ),
        }
    }

    async fn capture_email(
        &self,
        from: ConversationState,
        client: &ClientId,
        text: &str,
    ) -> TransitionOutcome {
        if SKIP_EMAIL.contains(&fold(text).trim_end_matches('.')) {
            return TransitionOutcome::new(from, S::Menu, SessionPatch::clear(), replies::menu());
        }

        let email = match validate_email(text) {
            Ok(email) => email,
            Err(_) => {
                return TransitionOutcome::new(
                    from,
                    from,
                    SessionPatch::keep(),
                    replies::ask_email_again(),
                )
            }
        };

        match self.clients.set_email(client, &email).await {
            Ok(_) => {
                TransitionOutcome::new(from, S::Menu, SessionPatch::clear(), replies::email_saved())
            }
            Err(error) => recovered(
                from,
                S::Menu,
                SessionPatch::clear(),
                replies::menu(),
                &ApplicationError::from(error),
            ),
        }
    }

    async fn start(
        &self,
        from: ConversationState,
        client: &ClientId,
        choice: MenuChoice,
    ) -> TransitionOutcome {
        match choice {
            MenuChoice::Book => {
                TransitionOutcome::new(from, S::AskDate, SessionPatch::clear(), replies::ask_date())
            }
            MenuChoice::Modify => TransitionOutcome::new(
                from,
                S::AskCode,
                SessionPatch::clear(),
                replies::ask_modify_code(),
            ),
            MenuChoice::Cancel => TransitionOutcome::new(
                from,
                S::AskCancelCode,
                SessionPatch::clear(),
                replies::ask_cancel_code(),
            ),
            MenuChoice::Consult => self.consult(from, client).await,
        }
    }

    async fn consult(&self, from: ConversationState, client: &ClientId) -> TransitionOutcome {
        match self.booking.upcoming(client, self.clock.today()).await {
            Ok(reservations) => TransitionOutcome::new(
                from,
                S::Menu,
                SessionPatch::clear(),
                replies::upcoming(&reservations),
            ),
            Err(error) => recovered(
                from,
                S::Menu,
                SessionPatch::clear(),
                replies::temporary_failure(),
                &error,
            ),
        }
    }

    async fn resolve_intent(
        &self,
        session: &ConversationSession,
        client: &ClientId,
        text: &str,
    ) -> TransitionOutcome {
        let from = session.state;
        let interpreted = match self.resolver.interpret(text).await {
            Ok(interpreted) => interpreted,
            Err(error) => {
                let error = ApplicationError::IntentResolution(error.to_string());
                return recovered(
                    from,
                    S::Menu,
                    SessionPatch::clear(),
                    replies::not_understood(),
                    &error,
                );
            }
        };
        debug!(
            event_name = "conversation.intent.resolved",
            intent = interpreted.intent.as_str(),
            has_date = interpreted.date.is_some(),
            has_time = interpreted.time.is_some(),
            has_people = interpreted.people.is_some(),
            "intent resolved"
        );

        match interpreted.intent {
            BookingIntent::CreateReservation => self.prefill_booking(session, &interpreted),
            BookingIntent::ModifyReservation => self.start(from, client, MenuChoice::Modify).await,
            BookingIntent::CancelReservation => self.start(from, client, MenuChoice::Cancel).await,
            BookingIntent::ConsultReservation => self.consult(from, client).await,
            BookingIntent::Menu | BookingIntent::Greeting => {
                TransitionOutcome::new(from, S::Menu, SessionPatch::clear(), replies::menu())
            }
            BookingIntent::Unknown => TransitionOutcome::new(
                from,
                S::Menu,
                SessionPatch::clear(),
                replies::not_understood(),
            ),
        }
    }

    /// Starts a booking with whatever the resolver's hints validate to, then
    /// asks for the first field still missing.
    fn prefill_booking(
        &self,
        session: &ConversationSession,
        interpreted: &InterpretedMessage,
    ) -> TransitionOutcome {
        let today = self.clock.today();
        let mut patch = SessionPatch::clear();
        if let Some(date) = interpreted
            .date
            .as_deref()
            .and_then(|hint| normalize_date(hint, today).ok())
            .filter(|date| *date >= today)
        {
            patch = patch.with_date(date);
        }
        if let Some(time) = interpreted.time.as_deref().and_then(|hint| normalize_time(hint).ok()) {
            patch = patch.with_time(time);
        }
        if let Some(party_size) =
            interpreted.people.and_then(|people| u32::try_from(people).ok()).filter(|n| *n > 0)
        {
            patch = patch.with_party_size(party_size);
        }

        self.advance(session, patch)
    }

    fn capture_date(&self, session: &ConversationSession, text: &str) -> TransitionOutcome {
        let today = self.clock.today();
        match normalize_date(text, today) {
            Ok(date) if date < today => reprompt(session.state, replies::date_in_past()),
            Ok(date) => self.advance(session, SessionPatch::keep().with_date(date)),
            Err(_) => reprompt(session.state, replies::date_again()),
        }
    }

    fn capture_time(&self, session: &ConversationSession, text: &str) -> TransitionOutcome {
        match normalize_time(text) {
            Ok(time) => self.advance(session, SessionPatch::keep().with_time(time)),
            Err(_) => reprompt(session.state, replies::time_again()),
        }
    }

    fn capture_party_size(&self, session: &ConversationSession, text: &str) -> TransitionOutcome {
        let party_size = fold(text)
            .split_whitespace()
            .next()
            .and_then(|token| token.parse::<i64>().ok())
            .and_then(|value| u32::try_from(value).ok())
            .filter(|value| *value > 0);

        match party_size {
            Some(party_size) => {
                self.advance(session, SessionPatch::keep().with_party_size(party_size))
            }
            None => reprompt(session.state, replies::party_size_again()),
        }
    }

    /// Applies `patch` to a preview of the working data and moves to the next
    /// question, or to the matching confirmation once everything is known.
    fn advance(&self, session: &ConversationSession, patch: SessionPatch) -> TransitionOutcome {
        let from = session.state;
        let mut preview = session.clone();
        preview.apply(from, &patch);
        let (to, reply) = next_step(&preview.working);
        TransitionOutcome::new(from, to, patch, reply)
    }

    async fn confirm_booking(
        &self,
        session: &ConversationSession,
        client: &ClientId,
    ) -> TransitionOutcome {
        let from = session.state;
        let Some((date, start_time, party_size)) = complete_slot(&session.working) else {
            return incomplete(from, SessionPatch::clear());
        };

        let request = AllocationRequest {
            client_id: client.clone(),
            date,
            start_time,
            party_size: i64::from(party_size),
            note: None,
        };
        match self.booking.book(&self.venue, &request, self.clock.now()).await {
            Ok(AllocationDecision::Admitted(admission)) => TransitionOutcome::new(
                from,
                S::Menu,
                SessionPatch::clear(),
                replies::booking_confirmed(&admission.reservation),
            )
            .with_effect(TurnEffect::ReservationConfirmed {
                reservation: admission.reservation,
                soft_limit_breached: admission.soft_limit_breached,
            }),
            Ok(AllocationDecision::Rejected(reason)) => rejected(from, reason),
            Err(error) => failed(from, &error),
        }
    }

    async fn capture_code(
        &self,
        from: ConversationState,
        client: &ClientId,
        text: &str,
        to: ConversationState,
    ) -> TransitionOutcome {
        let Some(code) = ReservationCode::parse(text) else {
            return reprompt(from, replies::code_again());
        };

        match self.booking.find_owned(&self.venue, client, &code).await {
            Ok(reservation) => {
                let reply = if to == S::ConfirmCancel {
                    replies::confirm_cancel(&reservation)
                } else {
                    replies::modify_start(&reservation)
                };
                TransitionOutcome::new(from, to, SessionPatch::clear().with_code(code), reply)
            }
            Err(error) if error.recovery() == Recovery::ExplainMissing => {
                reprompt(from, replies::reservation_not_found(&code))
            }
            Err(error) => {
                recovered(from, from, SessionPatch::keep(), replies::temporary_failure(), &error)
            }
        }
    }

    async fn confirm_modify(
        &self,
        session: &ConversationSession,
        client: &ClientId,
    ) -> TransitionOutcome {
        let from = session.state;
        let (Some(code), Some((date, start_time, party_size))) =
            (session.working.reservation_code.as_ref(), complete_slot(&session.working))
        else {
            return incomplete(from, SessionPatch::clear());
        };

        let decision = self
            .booking
            .modify(&self.venue, client, code, date, start_time, i64::from(party_size))
            .await;
        match decision {
            Ok(AllocationDecision::Admitted(admission)) => TransitionOutcome::new(
                from,
                S::Menu,
                SessionPatch::clear(),
                replies::reservation_modified(&admission.reservation),
            )
            .with_effect(TurnEffect::ReservationModified {
                reservation: admission.reservation,
                soft_limit_breached: admission.soft_limit_breached,
            }),
            Ok(AllocationDecision::Rejected(reason)) => rejected(from, reason),
            Err(error) => failed(from, &error),
        }
    }

    async fn confirm_cancel(
        &self,
        session: &ConversationSession,
        client: &ClientId,
    ) -> TransitionOutcome {
        let from = session.state;
        let Some(code) = session.working.reservation_code.as_ref() else {
            return incomplete(from, SessionPatch::clear());
        };

        match self.booking.cancel(&self.venue, client, code).await {
            Ok(reservation) => TransitionOutcome::new(
                from,
                S::Menu,
                SessionPatch::clear(),
                replies::reservation_cancelled(&reservation.code),
            )
            .with_effect(TurnEffect::ReservationCancelled { reservation }),
            Err(error) => failed(from, &error),
        }
    }
}

fn next_step(working: &WorkingData) -> (ConversationState, String) {
    match (working.date, working.time, working.party_size) {
        (None, _, _) => (S::AskDate, replies::ask_date()),
        (Some(_), None, _) => (S::AskTime, replies::ask_time()),
        (Some(_), Some(_), None) => (S::AskPartySize, replies::ask_party_size()),
        (Some(date), Some(time), Some(party_size)) => match &working.reservation_code {
            Some(code) => {
                (S::ConfirmModify, replies::confirm_modify(code, date, time, party_size))
            }
            None => (S::Confirm, replies::confirm_booking(date, time, party_size)),
        },
    }
}

fn complete_slot(working: &WorkingData) -> Option<(NaiveDate, NaiveTime, u32)> {
    Some((working.date?, working.time?, working.party_size?))
}

fn reprompt(state: ConversationState, reply: String) -> TransitionOutcome {
    TransitionOutcome::new(state, state, SessionPatch::keep(), reply)
}

fn incomplete(from: ConversationState, patch: SessionPatch) -> TransitionOutcome {
    let error = ApplicationError::Domain(DomainError::InvariantViolation(format!(
        "confirmation in {} without complete working data",
        from.as_str()
    )));
    recovered(from, S::Menu, patch, replies::temporary_failure(), &error)
}

/// Allocation said no. Conflicts offer a retry with another date or going back
/// to the menu; an invalid party size asks for it again.
fn rejected(from: ConversationState, reason: RejectionReason) -> TransitionOutcome {
    info!(
        event_name = "conversation.booking.rejected",
        state = from.as_str(),
        reason = reason.as_str(),
        "allocation rejected"
    );
    let outcome = match ApplicationError::from(reason).recovery() {
        Recovery::Reprompt => TransitionOutcome::new(
            from,
            S::AskPartySize,
            SessionPatch::keep(),
            replies::party_size_again(),
        ),
        _ => TransitionOutcome::new(
            from,
            S::ResolveConflict,
            SessionPatch::keep(),
            replies::conflict(reason),
        ),
    };
    outcome.with_effect(TurnEffect::Rejected { reason: reason.as_str() })
}

/// Confirmation step errors. Storage and code generation failures keep the
/// confirmation state so answering "si" again retries.
fn failed(from: ConversationState, error: &ApplicationError) -> TransitionOutcome {
    match error.recovery() {
        Recovery::OfferAlternatives => {
            let reason = match error {
                ApplicationError::Conflict(kind) => rejection_for(*kind),
                _ => RejectionReason::DuplicateBooking,
            };
            rejected(from, reason)
        }
        Recovery::Reprompt => recovered(
            from,
            S::AskPartySize,
            SessionPatch::keep(),
            replies::party_size_again(),
            error,
        ),
        Recovery::ExplainMissing => {
            recovered(from, S::Menu, SessionPatch::clear(), replies::reservation_gone(), error)
        }
        Recovery::FallbackToMenu => {
            recovered(from, S::Menu, SessionPatch::clear(), replies::menu(), error)
        }
        Recovery::RetryConfirmation => {
            recovered(from, from, SessionPatch::keep(), replies::could_not_complete(), error)
        }
    }
}

fn rejection_for(kind: ConflictKind) -> RejectionReason {
    match kind {
        ConflictKind::DuplicateBooking => RejectionReason::DuplicateBooking,
        ConflictKind::NoSuitableTable => RejectionReason::NoSuitableTable,
        ConflictKind::TableClassExhausted => RejectionReason::TableClassExhausted,
        ConflictKind::CapacityExceeded => RejectionReason::CapacityExceeded,
    }
}

fn recovered(
    from: ConversationState,
    to: ConversationState,
    patch: SessionPatch,
    reply: String,
    error: &ApplicationError,
) -> TransitionOutcome {
    warn!(
        event_name = "conversation.turn.recovered",
        state = from.as_str(),
        next_state = to.as_str(),
        error_class = error.error_class(),
        error = %error,
        "turn recovered from error"
    );
    TransitionOutcome::new(from, to, patch, reply)
        .with_effect(TurnEffect::Recovered { error_class: error.error_class() })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use turnero_core::booking::{
        AllocationDecision, AllocationRequest, BookingService, CapacityAllocator, ClientDirectory,
        InMemoryClientDirectory, InMemoryReservationGateway, StaticVenueCatalog,
    };
    use turnero_core::clock::FixedClock;
    use turnero_core::domain::client::{Client, ClientId};
    use turnero_core::domain::reservation::{ReservationCode, ReservationStatus};
    use turnero_core::domain::session::{ChannelIdentity, ConversationSession};
    use turnero_core::domain::venue::{CapacityMode, TableClass, VenueConfig, VenueId};
    use turnero_core::flows::{ConversationState, TransitionOutcome, TurnEffect};
    use turnero_core::intent::{IntentResolutionError, IntentResolver, InterpretedMessage};

    use super::ConversationMachine;
    use crate::resolver::KeywordIntentResolver;

    const CLIENT: &str = "30111222";

    struct Fixture {
        machine: ConversationMachine,
        gateway: InMemoryReservationGateway,
        clients: InMemoryClientDirectory,
        booking: BookingService,
        session: ConversationSession,
    }

    impl Fixture {
        async fn new(tables: Vec<TableClass>) -> Self {
            Self::with_resolver(tables, Arc::new(KeywordIntentResolver::new())).await
        }

        async fn with_resolver(
            tables: Vec<TableClass>,
            resolver: Arc<dyn IntentResolver>,
        ) -> Self {
            let venue = VenueConfig {
                id: venue_id(),
                branch_code: 1,
                max_capacity: 20,
                slot_minutes: 90,
                capacity_mode: CapacityMode::Strict,
                capacity_overrides: BTreeMap::new(),
                tables,
            };
            let gateway = InMemoryReservationGateway::default();
            let clients = InMemoryClientDirectory::default();
            let booking = BookingService::new(
                Arc::new(gateway.clone()),
                Arc::new(StaticVenueCatalog::new([venue])),
                CapacityAllocator::default(),
            );
            let now = Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).single().expect("timestamp");
            let machine = ConversationMachine::new(
                booking.clone(),
                Arc::new(clients.clone()),
                resolver,
                Arc::new(FixedClock::new(now)),
                venue_id(),
            );
            let identity = ChannelIdentity("5491155550000".to_owned());
            let session = ConversationSession::new(identity, now);
            Self { machine, gateway, clients, booking, session }
        }

        async fn with_known_client(mut self) -> Self {
            let now = self.session.updated_at;
            let mut client =
                Client::register(ClientId(CLIENT.to_owned()), "Ana Pérez", "5491155550000", now)
                    .expect("valid client");
            client.email = Some("ana@example.com".to_owned());
            self.clients.register(client).await.expect("registered");
            self.session.client_id = Some(ClientId(CLIENT.to_owned()));
            self.session.state = ConversationState::Menu;
            self
        }

        async fn say(&mut self, text: &str) -> TransitionOutcome {
            let outcome = self.machine.transition(&self.session, text).await;
            self.session.apply(outcome.to, &outcome.patch);
            outcome
        }

        async fn book_directly(&self, client: &str, day: u32, hour: u32) -> ReservationCode {
            let request = AllocationRequest {
                client_id: ClientId(client.to_owned()),
                date: NaiveDate::from_ymd_opt(2026, 3, day).expect("date"),
                start_time: NaiveTime::from_hms_opt(hour, 0, 0).expect("time"),
                party_size: 2,
                note: None,
            };
            match self.booking.book(&venue_id(), &request, self.session.updated_at).await {
                Ok(AllocationDecision::Admitted(admission)) => admission.reservation.code,
                other => panic!("expected admission, got {other:?}"),
            }
        }
    }

    fn venue_id() -> VenueId {
        VenueId("principal".to_owned())
    }

    fn tables() -> Vec<TableClass> {
        vec![TableClass { capacity: 2, quantity: 2 }, TableClass { capacity: 4, quantity: 1 }]
    }

    struct BrokenResolver;

    #[async_trait]
    impl IntentResolver for BrokenResolver {
        async fn interpret(
            &self,
            _text: &str,
        ) -> Result<InterpretedMessage, IntentResolutionError> {
            Err(IntentResolutionError::Malformed("not json".to_owned()))
        }
    }

    #[tokio::test]
    async fn first_contact_registers_the_client() {
        let mut fixture = Fixture::new(tables()).await;

        let greeting = fixture.say("hola").await;
        assert_eq!(greeting.to, ConversationState::AwaitId);

        let unknown_id = fixture.say("30.111.222").await;
        assert_eq!(unknown_id.to, ConversationState::RegisterName);
        assert_eq!(fixture.session.working.pending_client, Some(ClientId(CLIENT.to_owned())));

        let bad_name = fixture.say("1234").await;
        assert_eq!(bad_name.to, ConversationState::RegisterName);

        let named = fixture.say("  Ana   Pérez ").await;
        assert_eq!(named.to, ConversationState::AwaitEmail);
        assert_eq!(
            named.effects,
            vec![TurnEffect::ClientRegistered { client_id: CLIENT.to_owned() }]
        );
        assert_eq!(fixture.session.client_id, Some(ClientId(CLIENT.to_owned())));
        assert!(fixture.session.working.is_empty());

        let bad_email = fixture.say("ana@").await;
        assert_eq!(bad_email.to, ConversationState::AwaitEmail);
        let email = fixture.say("Ana@Example.com").await;
        assert_eq!(email.to, ConversationState::Menu);

        let stored = fixture.clients.find(&ClientId(CLIENT.to_owned())).await.expect("find");
        let stored = stored.expect("client stored");
        assert_eq!(stored.name, "Ana Pérez");
        assert_eq!(stored.email.as_deref(), Some("ana@example.com"));
    }

    #[tokio::test]
    async fn returning_client_goes_straight_to_the_menu() {
        let mut fixture = Fixture::new(tables()).await.with_known_client().await;
        fixture.session.client_id = None;
        fixture.session.state = ConversationState::New;

        let outcome = fixture.say("30111222").await;
        assert_eq!(outcome.to, ConversationState::Menu);
        assert!(outcome.reply.contains("Ana"));
        assert_eq!(fixture.session.client_id, Some(ClientId(CLIENT.to_owned())));

        let again = fixture.say("hola").await;
        assert_eq!(again.to, ConversationState::Menu);
    }

    #[tokio::test]
    async fn returning_client_without_email_is_asked_for_one() {
        let mut fixture = Fixture::new(tables()).await;
        let now = fixture.session.updated_at;
        let client =
            Client::register(ClientId(CLIENT.to_owned()), "Ana Pérez", "5491155550000", now)
                .expect("valid client");
        fixture.clients.register(client).await.expect("registered");
        fixture.session.state = ConversationState::AwaitId;

        let outcome = fixture.say("30111222").await;
        assert_eq!(outcome.to, ConversationState::AwaitEmail);
        assert!(outcome.reply.contains("Ana"));
        assert_eq!(fixture.session.client_id, Some(ClientId(CLIENT.to_owned())));

        let skipped = fixture.say("omitir").await;
        assert_eq!(skipped.to, ConversationState::Menu);
    }

    #[tokio::test]
    async fn shortcut_booking_flow_confirms_with_a_code() {
        let mut fixture = Fixture::new(tables()).await.with_known_client().await;

        assert_eq!(fixture.say("1").await.to, ConversationState::AskDate);
        assert_eq!(fixture.say("mañana").await.to, ConversationState::AskTime);
        assert_eq!(fixture.say("21hs").await.to, ConversationState::AskPartySize);
        let summary = fixture.say("3").await;
        assert_eq!(summary.to, ConversationState::Confirm);
        assert!(summary.reply.contains("11/03/2026 a las 21:00 para 3 personas"));

        let confirmed = fixture.say("Sí").await;
        assert_eq!(confirmed.to, ConversationState::Menu);
        assert!(confirmed.reply.contains("RC-26-0311-0001"));
        match confirmed.effects.as_slice() {
            [TurnEffect::ReservationConfirmed { reservation, soft_limit_breached: false }] => {
                assert_eq!(reservation.code.as_str(), "RC-26-0311-0001");
                assert_eq!(reservation.table_capacity, 4);
            }
            other => panic!("unexpected effects {other:?}"),
        }
        assert!(fixture.session.working.is_empty());
        assert_eq!(fixture.gateway.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn anything_but_si_declines_without_booking() {
        let mut fixture = Fixture::new(tables()).await.with_known_client().await;
        fixture.say("1").await;
        fixture.say("12/03").await;
        fixture.say("20:30").await;
        fixture.say("2").await;

        let declined = fixture.say("dale").await;
        assert_eq!(declined.to, ConversationState::Menu);
        assert!(fixture.session.working.is_empty());
        assert!(fixture.gateway.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn decomposed_si_confirms_the_booking() {
        let mut fixture = Fixture::new(tables()).await.with_known_client().await;
        fixture.say("1").await;
        fixture.say("12/03").await;
        fixture.say("21").await;
        assert_eq!(fixture.say("2").await.to, ConversationState::Confirm);

        let confirmed = fixture.say("si\u{301}").await;
        assert_eq!(confirmed.to, ConversationState::Menu);
        assert!(confirmed.reply.contains("RC-26-0312-0001"), "{}", confirmed.reply);
        assert_eq!(fixture.gateway.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn invalid_answers_reprompt_in_place() {
        let mut fixture = Fixture::new(tables()).await.with_known_client().await;
        fixture.say("1").await;

        let past = fixture.say("01/03").await;
        assert_eq!(past.to, ConversationState::AskDate);
        assert!(past.reply.contains("ya pasó"));
        assert_eq!(fixture.say("el finde").await.to, ConversationState::AskDate);

        fixture.say("hoy").await;
        assert_eq!(fixture.say("25:00").await.to, ConversationState::AskTime);
        fixture.say("20").await;

        assert_eq!(fixture.say("0").await.to, ConversationState::AskPartySize);
        assert_eq!(fixture.say("-2").await.to, ConversationState::AskPartySize);
        assert_eq!(fixture.say("muchos").await.to, ConversationState::AskPartySize);
        assert_eq!(fixture.say("2 personas").await.to, ConversationState::Confirm);
    }

    #[tokio::test]
    async fn conflict_offers_retry_and_never_books_automatically() {
        let mut fixture = Fixture::new(vec![TableClass { capacity: 4, quantity: 1 }])
            .await
            .with_known_client()
            .await;
        fixture.book_directly("40111222", 12, 21).await;

        fixture.say("1").await;
        fixture.say("12/03").await;
        fixture.say("21:30").await;
        fixture.say("4").await;
        let conflict = fixture.say("si").await;

        assert_eq!(conflict.to, ConversationState::ResolveConflict);
        assert_eq!(
            conflict.effects,
            vec![TurnEffect::Rejected { reason: "table_class_exhausted" }]
        );
        assert!(conflict.reply.contains("1. Elegir otra fecha"));
        assert_eq!(fixture.gateway.snapshot().await.len(), 1);

        let retry = fixture.say("1").await;
        assert_eq!(retry.to, ConversationState::AskDate);
        assert!(fixture.session.working.is_empty());

        fixture.say("13/03").await;
        fixture.say("21:30").await;
        fixture.say("4").await;
        let booked = fixture.say("si").await;
        assert!(booked.reply.contains("RC-26-0313-0001"));
    }

    #[tokio::test]
    async fn abandoning_a_conflict_returns_to_the_menu() {
        let mut fixture = Fixture::new(vec![TableClass { capacity: 2, quantity: 4 }])
            .await
            .with_known_client()
            .await;
        fixture.say("1").await;
        fixture.say("12/03").await;
        fixture.say("21").await;
        fixture.say("6").await;

        let conflict = fixture.say("si").await;
        assert_eq!(conflict.effects, vec![TurnEffect::Rejected { reason: "no_suitable_table" }]);
        let abandoned = fixture.say("2").await;
        assert_eq!(abandoned.to, ConversationState::Menu);
        assert!(fixture.session.working.is_empty());
    }

    #[tokio::test]
    async fn free_text_request_prefills_validated_hints() {
        let mut fixture = Fixture::new(tables()).await.with_known_client().await;

        let outcome = fixture.say("Quiero reservar para mañana a las 21 para 2 personas").await;
        assert_eq!(outcome.to, ConversationState::Confirm);
        assert_eq!(fixture.session.working.date, NaiveDate::from_ymd_opt(2026, 3, 11));
        assert_eq!(fixture.session.working.party_size, Some(2));

        fixture.say("menu").await;
        let partial = fixture.say("quiero una mesa a las 21").await;
        assert_eq!(partial.to, ConversationState::AskDate);
        assert!(fixture.session.working.time.is_some());
        assert_eq!(fixture.say("12/03").await.to, ConversationState::AskPartySize);
    }

    #[tokio::test]
    async fn unknown_and_failed_intents_resend_the_menu() {
        let mut fixture = Fixture::new(tables()).await.with_known_client().await;
        let unknown = fixture.say("cuánto sale el estacionamiento").await;
        assert_eq!(unknown.to, ConversationState::Menu);
        assert!(unknown.effects.is_empty());

        let mut broken = Fixture::with_resolver(tables(), Arc::new(BrokenResolver))
            .await
            .with_known_client()
            .await;
        let fallback = broken.say("reservame algo").await;
        assert_eq!(fallback.to, ConversationState::Menu);
        assert_eq!(
            fallback.effects,
            vec![TurnEffect::Recovered { error_class: "intent_resolution" }]
        );
        assert!(broken.gateway.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn modify_flow_keeps_the_code() {
        let mut fixture = Fixture::new(tables()).await.with_known_client().await;
        let code = fixture.book_directly(CLIENT, 12, 20).await;

        assert_eq!(fixture.say("2").await.to, ConversationState::AskCode);
        let found = fixture.say(&code.as_str().to_lowercase()).await;
        assert_eq!(found.to, ConversationState::AskDate);
        assert!(found.reply.contains(code.as_str()));

        fixture.say("13/03").await;
        fixture.say("22:00").await;
        let summary = fixture.say("4").await;
        assert_eq!(summary.to, ConversationState::ConfirmModify);

        let modified = fixture.say("si").await;
        assert_eq!(modified.to, ConversationState::Menu);
        match modified.effects.as_slice() {
            [TurnEffect::ReservationModified { reservation, .. }] => {
                assert_eq!(reservation.code, code);
                assert_eq!(reservation.party_size, 4);
                assert_eq!(reservation.date(), NaiveDate::from_ymd_opt(2026, 3, 13).expect("date"));
            }
            other => panic!("unexpected effects {other:?}"),
        }
        assert_eq!(fixture.gateway.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn codes_of_other_clients_read_as_missing() {
        let mut fixture = Fixture::new(tables()).await.with_known_client().await;
        let foreign = fixture.book_directly("40111222", 12, 20).await;

        fixture.say("3").await;
        let missing = fixture.say(foreign.as_str()).await;
        assert_eq!(missing.to, ConversationState::AskCancelCode);
        assert!(missing.reply.contains("No encontramos"));

        let malformed = fixture.say("RC-1").await;
        assert_eq!(malformed.to, ConversationState::AskCancelCode);
        assert!(malformed.reply.contains("formato"));
    }

    #[tokio::test]
    async fn cancel_flow_marks_the_reservation_cancelled() {
        let mut fixture = Fixture::new(tables()).await.with_known_client().await;
        let code = fixture.book_directly(CLIENT, 12, 20).await;

        fixture.say("quiero cancelar mi reserva").await;
        assert_eq!(fixture.session.state, ConversationState::AskCancelCode);
        assert_eq!(fixture.say(code.as_str()).await.to, ConversationState::ConfirmCancel);

        let cancelled = fixture.say("SI").await;
        assert_eq!(cancelled.to, ConversationState::Menu);
        assert!(matches!(
            cancelled.effects.as_slice(),
            [TurnEffect::ReservationCancelled { .. }]
        ));
        let rows = fixture.gateway.snapshot().await;
        assert_eq!(rows[0].status, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn consult_lists_upcoming_reservations() {
        let mut fixture = Fixture::new(tables()).await.with_known_client().await;
        let code = fixture.book_directly(CLIENT, 12, 20).await;

        let listing = fixture.say("4").await;
        assert_eq!(listing.to, ConversationState::Menu);
        assert!(listing.reply.contains(code.as_str()));
        assert!(listing.reply.contains("12/03/2026 20:00"));
    }

    #[tokio::test]
    async fn exit_words_abandon_any_flow() {
        let mut fixture = Fixture::new(tables()).await.with_known_client().await;
        fixture.say("1").await;
        fixture.say("12/03").await;

        let abandoned = fixture.say("Salir").await;
        assert_eq!(abandoned.to, ConversationState::Menu);
        assert!(fixture.session.working.is_empty());
    }

    #[tokio::test]
    async fn client_bound_state_without_client_restarts_identification() {
        let mut fixture = Fixture::new(tables()).await;
        fixture.session.state = ConversationState::Confirm;

        let outcome = fixture.say("si").await;
        assert_eq!(outcome.to, ConversationState::AwaitId);
        assert_eq!(outcome.effects, vec![TurnEffect::Recovered { error_class: "domain" }]);
    }
}
