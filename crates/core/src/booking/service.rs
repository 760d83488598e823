use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::{info, warn};

use crate::booking::allocator::{
    AllocationDecision, AllocationError, AllocationRequest, CapacityAllocator,
};
use crate::booking::gateway::{ReservationGateway, ReservationUnitOfWork, VenueCatalog};
use crate::domain::client::ClientId;
use crate::domain::reservation::{
    Reservation, ReservationCode, ReservationPatch, ReservationStatus,
};
use crate::domain::venue::{VenueConfig, VenueId};
use crate::errors::ApplicationError;

/// Runs each booking operation in its own unit of work: commit on admission,
/// roll back on rejection or error.
#[derive(Clone)]
pub struct BookingService {
    gateway: Arc<dyn ReservationGateway>,
    venues: Arc<dyn VenueCatalog>,
    allocator: CapacityAllocator,
}

impl BookingService {
    pub fn new(
        gateway: Arc<dyn ReservationGateway>,
        venues: Arc<dyn VenueCatalog>,
        allocator: CapacityAllocator,
    ) -> Self {
        Self { gateway, venues, allocator }
    }

    pub fn venue(&self, id: &VenueId) -> Result<VenueConfig, ApplicationError> {
        self.venues
            .venue(id)
            .ok_or_else(|| ApplicationError::Configuration(format!("unknown venue `{}`", id.0)))
    }

    pub async fn book(
        &self,
        venue_id: &VenueId,
        request: &AllocationRequest,
        now: DateTime<Utc>,
    ) -> Result<AllocationDecision, ApplicationError> {
        let venue = self.venue(venue_id)?;
        let mut uow = self.gateway.begin().await?;
        let result = self.allocator.try_allocate(uow.as_mut(), &venue, request, now).await;
        let decision = settle(uow, result).await?;
        log_decision("book", &venue.id, &decision);
        Ok(decision)
    }

    pub async fn modify(
        &self,
        venue_id: &VenueId,
        client: &ClientId,
        code: &ReservationCode,
        date: NaiveDate,
        start_time: NaiveTime,
        party_size: i64,
    ) -> Result<AllocationDecision, ApplicationError> {
        let venue = self.venue(venue_id)?;
        let mut uow = self.gateway.begin().await?;

        let existing = match uow.find_by_code(&venue.id, code).await {
            Ok(Some(existing)) if owned_and_confirmed(&existing, client) => existing,
            Ok(_) => {
                discard(uow).await;
                return Err(ApplicationError::NotFound(format!("reservation `{code}`")));
            }
            Err(error) => {
                discard(uow).await;
                return Err(error.into());
            }
        };

        let result = self
            .allocator
            .try_reallocate(uow.as_mut(), &venue, &existing, date, start_time, party_size)
            .await;
        let decision = settle(uow, result).await?;
        log_decision("modify", &venue.id, &decision);
        Ok(decision)
    }

    pub async fn cancel(
        &self,
        venue_id: &VenueId,
        client: &ClientId,
        code: &ReservationCode,
    ) -> Result<Reservation, ApplicationError> {
        let venue = self.venue(venue_id)?;
        let mut uow = self.gateway.begin().await?;

        let result = cancel_in(uow.as_mut(), &venue.id, client, code).await;
        match result {
            Ok(cancelled) => {
                uow.commit().await?;
                info!(
                    event_name = "booking.reservation.cancelled",
                    venue_id = %venue.id.0,
                    reservation_code = %cancelled.code,
                    "reservation cancelled"
                );
                Ok(cancelled)
            }
            Err(error) => {
                discard(uow).await;
                Err(error)
            }
        }
    }

    /// A confirmed reservation owned by `client`. Anything else reads as not
    /// found so codes of other clients are never disclosed.
    pub async fn find_owned(
        &self,
        venue_id: &VenueId,
        client: &ClientId,
        code: &ReservationCode,
    ) -> Result<Reservation, ApplicationError> {
        match self.gateway.find_by_code(venue_id, code).await? {
            Some(reservation) if owned_and_confirmed(&reservation, client) => Ok(reservation),
            _ => Err(ApplicationError::NotFound(format!("reservation `{code}`"))),
        }
    }

    pub async fn upcoming(
        &self,
        client: &ClientId,
        from: NaiveDate,
    ) -> Result<Vec<Reservation>, ApplicationError> {
        Ok(self.gateway.list_upcoming_for_client(client, from).await?)
    }
}

async fn cancel_in(
    uow: &mut dyn ReservationUnitOfWork,
    venue: &VenueId,
    client: &ClientId,
    code: &ReservationCode,
) -> Result<Reservation, ApplicationError> {
    let mut reservation = match uow.find_by_code(venue, code).await? {
        Some(reservation) if owned_and_confirmed(&reservation, client) => reservation,
        _ => return Err(ApplicationError::NotFound(format!("reservation `{code}`"))),
    };
    reservation.transition_to(ReservationStatus::Cancelled)?;

    let patch =
        ReservationPatch { status: Some(reservation.status), ..ReservationPatch::default() };
    Ok(uow.update_reservation(venue, code, &patch).await?)
}

fn owned_and_confirmed(reservation: &Reservation, client: &ClientId) -> bool {
    &reservation.client_id == client && reservation.is_confirmed()
}

async fn settle(
    uow: Box<dyn ReservationUnitOfWork>,
    result: Result<AllocationDecision, AllocationError>,
) -> Result<AllocationDecision, ApplicationError> {
    match result {
        Ok(decision @ AllocationDecision::Admitted(_)) => {
            uow.commit().await?;
            Ok(decision)
        }
        Ok(decision) => {
            discard(uow).await;
            Ok(decision)
        }
        Err(error) => {
            discard(uow).await;
            Err(error.into())
        }
    }
}

async fn discard(uow: Box<dyn ReservationUnitOfWork>) {
    if let Err(error) = uow.rollback().await {
        warn!(
            event_name = "booking.unit_of_work.rollback_failed",
            error = %error,
            "rollback failed; storage discards the transaction on release"
        );
    }
}

fn log_decision(operation: &'static str, venue: &VenueId, decision: &AllocationDecision) {
    match decision {
        AllocationDecision::Admitted(admission) => info!(
            event_name = "booking.allocation.admitted",
            operation,
            venue_id = %venue.0,
            reservation_code = %admission.reservation.code,
            table_capacity = admission.reservation.table_capacity,
            party_size = admission.reservation.party_size,
            soft_limit_breached = admission.soft_limit_breached,
            "reservation admitted"
        ),
        AllocationDecision::Rejected(reason) => info!(
            event_name = "booking.allocation.rejected",
            operation,
            venue_id = %venue.0,
            reason = reason.as_str(),
            "reservation rejected"
        ),
    }
}
