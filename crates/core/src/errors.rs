use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::reservation::ReservationStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid reservation transition from {from:?} to {to:?}")]
    InvalidReservationTransition { from: ReservationStatus, to: ReservationStatus },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    DuplicateBooking,
    NoSuitableTable,
    TableClassExhausted,
    CapacityExceeded,
}

impl ConflictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateBooking => "duplicate_booking",
            Self::NoSuitableTable => "no_suitable_table",
            Self::TableClassExhausted => "table_class_exhausted",
            Self::CapacityExceeded => "capacity_exceeded",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("booking conflict: {}", .0.as_str())]
    Conflict(ConflictKind),
    #[error("intent resolution failure: {0}")]
    IntentResolution(String),
    #[error("reservation code generation failure: {0}")]
    CodeGeneration(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

/// What the conversation does with the user after an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovery {
    /// Same state, ask again.
    Reprompt,
    /// Explain the miss, stay in the current state.
    ExplainMissing,
    /// Offer a new date/time or abandoning the flow.
    OfferAlternatives,
    /// Log and send the menu again.
    FallbackToMenu,
    /// Generic failure message; the confirmation step is kept so the user can
    /// answer "si" again.
    RetryConfirmation,
}

impl ApplicationError {
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Domain(DomainError::Validation(_)) => Recovery::Reprompt,
            Self::NotFound(_) => Recovery::ExplainMissing,
            Self::Conflict(_) => Recovery::OfferAlternatives,
            Self::IntentResolution(_) | Self::Integration(_) => Recovery::FallbackToMenu,
            Self::Domain(_)
            | Self::CodeGeneration(_)
            | Self::Persistence(_)
            | Self::Configuration(_) => Recovery::RetryConfirmation,
        }
    }

    /// Stable label for logs and audit metadata.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::Validation(_)) => "validation",
            Self::Domain(_) => "domain",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::IntentResolution(_) => "intent_resolution",
            Self::CodeGeneration(_) => "code_generation",
            Self::Persistence(_) => "persistence",
            Self::Integration(_) => "integration",
            Self::Configuration(_) => "configuration",
        }
    }
}
