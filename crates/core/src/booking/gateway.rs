use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

use crate::domain::client::{Client, ClientId};
use crate::domain::reservation::{Reservation, ReservationCode, ReservationPatch, Slot};
use crate::domain::venue::{VenueConfig, VenueId};
use crate::errors::{ApplicationError, ConflictKind};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("reservation conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<GatewayError> for ApplicationError {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::Conflict(_) => Self::Conflict(ConflictKind::DuplicateBooking),
            GatewayError::NotFound(message) => Self::NotFound(message),
            GatewayError::Storage(message) => Self::Persistence(message),
        }
    }
}

/// Population a reservation code ordinal is counted over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CountScope {
    VenueDay { venue: VenueId, date: NaiveDate },
    Venue { venue: VenueId },
    Global,
}

impl CountScope {
    pub fn venue(&self) -> Option<&VenueId> {
        match self {
            Self::VenueDay { venue, .. } | Self::Venue { venue } => Some(venue),
            Self::Global => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlapQuery {
    pub venue: VenueId,
    /// `None` matches every table class.
    pub table_capacity: Option<u32>,
    pub slot: Slot,
    pub exclude: Option<ReservationCode>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlapRow {
    pub party_size: u32,
    pub table_capacity: u32,
}

/// One storage transaction. Every read and the final write of an allocation
/// happen through the same unit so concurrent allocations serialize in
/// storage. Dropping a unit without committing discards its writes.
#[async_trait]
pub trait ReservationUnitOfWork: Send {
    async fn count_confirmed(&mut self, scope: &CountScope) -> Result<u32, GatewayError>;

    /// `venue` of `None` checks across every venue.
    async fn code_exists(
        &mut self,
        venue: Option<&VenueId>,
        code: &ReservationCode,
    ) -> Result<bool, GatewayError>;

    /// Confirmed reservations whose slot overlaps `query.slot`.
    async fn find_overlapping(
        &mut self,
        query: &OverlapQuery,
    ) -> Result<Vec<OverlapRow>, GatewayError>;

    async fn find_exact(
        &mut self,
        client: &ClientId,
        venue: &VenueId,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<Option<Reservation>, GatewayError>;

    async fn find_by_code(
        &mut self,
        venue: &VenueId,
        code: &ReservationCode,
    ) -> Result<Option<Reservation>, GatewayError>;

    /// Fails with `GatewayError::Conflict` on a unique-key violation.
    async fn insert_confirmed(&mut self, reservation: Reservation)
        -> Result<Reservation, GatewayError>;

    /// Fails with `GatewayError::NotFound` when no row carries the code.
    async fn update_reservation(
        &mut self,
        venue: &VenueId,
        code: &ReservationCode,
        patch: &ReservationPatch,
    ) -> Result<Reservation, GatewayError>;

    async fn commit(self: Box<Self>) -> Result<(), GatewayError>;

    async fn rollback(self: Box<Self>) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait ReservationGateway: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ReservationUnitOfWork>, GatewayError>;

    async fn find_by_code(
        &self,
        venue: &VenueId,
        code: &ReservationCode,
    ) -> Result<Option<Reservation>, GatewayError>;

    /// Confirmed reservations of the client on or after `from`, soonest first.
    async fn list_upcoming_for_client(
        &self,
        client: &ClientId,
        from: NaiveDate,
    ) -> Result<Vec<Reservation>, GatewayError>;
}

#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn find(&self, id: &ClientId) -> Result<Option<Client>, GatewayError>;

    /// Fails with `GatewayError::Conflict` when the key is already registered.
    async fn register(&self, client: Client) -> Result<Client, GatewayError>;

    async fn set_email(&self, id: &ClientId, email: &str) -> Result<Client, GatewayError>;
}

pub trait VenueCatalog: Send + Sync {
    fn venue(&self, id: &VenueId) -> Option<VenueConfig>;
}

/// Post-commit notification of a confirmed booking. Failures are logged by the
/// caller and never undo the booking.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn reservation_confirmed(
        &self,
        client: &Client,
        reservation: &Reservation,
    ) -> Result<(), GatewayError>;
}
