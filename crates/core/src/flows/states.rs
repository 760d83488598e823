use serde::{Deserialize, Serialize};

use crate::domain::reservation::Reservation;
use crate::domain::session::SessionPatch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    New,
    AwaitId,
    RegisterName,
    AwaitEmail,
    Menu,
    AskDate,
    AskTime,
    AskPartySize,
    Confirm,
    ResolveConflict,
    AskCode,
    ConfirmModify,
    AskCancelCode,
    ConfirmCancel,
}

impl ConversationState {
    pub const ALL: [ConversationState; 14] = [
        Self::New,
        Self::AwaitId,
        Self::RegisterName,
        Self::AwaitEmail,
        Self::Menu,
        Self::AskDate,
        Self::AskTime,
        Self::AskPartySize,
        Self::Confirm,
        Self::ResolveConflict,
        Self::AskCode,
        Self::ConfirmModify,
        Self::AskCancelCode,
        Self::ConfirmCancel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::AwaitId => "AWAIT_ID",
            Self::RegisterName => "REGISTER_NAME",
            Self::AwaitEmail => "AWAIT_EMAIL",
            Self::Menu => "MENU",
            Self::AskDate => "ASK_DATE",
            Self::AskTime => "ASK_TIME",
            Self::AskPartySize => "ASK_PARTY_SIZE",
            Self::Confirm => "CONFIRM",
            Self::ResolveConflict => "RESOLVE_CONFLICT",
            Self::AskCode => "ASK_CODE",
            Self::ConfirmModify => "CONFIRM_MODIFY",
            Self::AskCancelCode => "ASK_CANCEL_CODE",
            Self::ConfirmCancel => "CONFIRM_CANCEL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == value)
    }

    /// States where working data is being collected for a booking, modify or
    /// cancel flow.
    pub fn is_mid_flow(self) -> bool {
        matches!(
            self,
            Self::AskDate
                | Self::AskTime
                | Self::AskPartySize
                | Self::Confirm
                | Self::ResolveConflict
                | Self::AskCode
                | Self::ConfirmModify
                | Self::AskCancelCode
                | Self::ConfirmCancel
        )
    }

    pub fn requires_client(self) -> bool {
        !matches!(self, Self::New | Self::AwaitId | Self::RegisterName)
    }
}

/// State-independent classification of an inbound text. Handlers still read
/// the raw text; the class only picks the row of the transition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputClass {
    Affirmative,
    Abort,
    Numeral(u8),
    IdentityNumber,
    Text,
}

/// Side effects a transition committed, reported so the runtime can audit and
/// notify after the session is saved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnEffect {
    ClientRegistered { client_id: String },
    ReservationConfirmed { reservation: Reservation, soft_limit_breached: bool },
    ReservationModified { reservation: Reservation, soft_limit_breached: bool },
    ReservationCancelled { reservation: Reservation },
    Rejected { reason: &'static str },
    Recovered { error_class: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: ConversationState,
    pub to: ConversationState,
    pub patch: SessionPatch,
    pub reply: String,
    pub effects: Vec<TurnEffect>,
}

impl TransitionOutcome {
    pub fn new(
        from: ConversationState,
        to: ConversationState,
        patch: SessionPatch,
        reply: impl Into<String>,
    ) -> Self {
        Self { from, to, patch, reply: reply.into(), effects: Vec::new() }
    }

    pub fn with_effect(mut self, effect: TurnEffect) -> Self {
        self.effects.push(effect);
        self
    }
}
