use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::booking::gateway::{
    ClientDirectory, CountScope, GatewayError, OverlapQuery, OverlapRow, ReservationGateway,
    ReservationUnitOfWork,
};
use crate::domain::client::{Client, ClientId};
use crate::domain::reservation::{Reservation, ReservationCode, ReservationPatch};
use crate::domain::venue::VenueId;

/// Process-local reservation store. A unit of work holds the store lock from
/// `begin` until commit or rollback, so allocations serialize the same way a
/// storage write lock would.
#[derive(Clone, Default)]
pub struct InMemoryReservationGateway {
    rows: Arc<Mutex<Vec<Reservation>>>,
}

impl InMemoryReservationGateway {
    pub async fn snapshot(&self) -> Vec<Reservation> {
        self.rows.lock().await.clone()
    }

    pub async fn seed(&self, reservation: Reservation) {
        self.rows.lock().await.push(reservation);
    }
}

#[async_trait]
impl ReservationGateway for InMemoryReservationGateway {
    async fn begin(&self) -> Result<Box<dyn ReservationUnitOfWork>, GatewayError> {
        let guard = Arc::clone(&self.rows).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork { guard, staged }))
    }

    async fn find_by_code(
        &self,
        venue: &VenueId,
        code: &ReservationCode,
    ) -> Result<Option<Reservation>, GatewayError> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().find(|row| &row.venue_id == venue && &row.code == code).cloned())
    }

    async fn list_upcoming_for_client(
        &self,
        client: &ClientId,
        from: NaiveDate,
    ) -> Result<Vec<Reservation>, GatewayError> {
        let rows = self.rows.lock().await;
        let mut upcoming: Vec<Reservation> = rows
            .iter()
            .filter(|row| &row.client_id == client && row.is_confirmed() && row.date() >= from)
            .cloned()
            .collect();
        upcoming.sort_by_key(|row| row.slot.start);
        Ok(upcoming)
    }
}

pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<Vec<Reservation>>,
    staged: Vec<Reservation>,
}

#[async_trait]
impl ReservationUnitOfWork for InMemoryUnitOfWork {
    async fn count_confirmed(&mut self, scope: &CountScope) -> Result<u32, GatewayError> {
        let count = self
            .staged
            .iter()
            .filter(|row| row.is_confirmed())
            .filter(|row| match scope {
                CountScope::VenueDay { venue, date } => {
                    &row.venue_id == venue && row.date() == *date
                }
                CountScope::Venue { venue } => &row.venue_id == venue,
                CountScope::Global => true,
            })
            .count();
        u32::try_from(count)
            .map_err(|_| GatewayError::Storage("confirmed count overflow".to_owned()))
    }

    async fn code_exists(
        &mut self,
        venue: Option<&VenueId>,
        code: &ReservationCode,
    ) -> Result<bool, GatewayError> {
        Ok(self
            .staged
            .iter()
            .any(|row| &row.code == code && venue.map_or(true, |venue| &row.venue_id == venue)))
    }

    async fn find_overlapping(
        &mut self,
        query: &OverlapQuery,
    ) -> Result<Vec<OverlapRow>, GatewayError> {
        Ok(self
            .staged
            .iter()
            .filter(|row| row.is_confirmed() && row.venue_id == query.venue)
            .filter(|row| {
                query.table_capacity.map_or(true, |capacity| row.table_capacity == capacity)
            })
            .filter(|row| query.exclude.as_ref() != Some(&row.code))
            .filter(|row| row.slot.overlaps(&query.slot))
            .map(|row| OverlapRow {
                party_size: row.party_size,
                table_capacity: row.table_capacity,
            })
            .collect())
    }

    async fn find_exact(
        &mut self,
        client: &ClientId,
        venue: &VenueId,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<Option<Reservation>, GatewayError> {
        Ok(self
            .staged
            .iter()
            .find(|row| {
                row.is_confirmed()
                    && &row.client_id == client
                    && &row.venue_id == venue
                    && row.date() == date
                    && row.start_time() == start_time
            })
            .cloned())
    }

    async fn find_by_code(
        &mut self,
        venue: &VenueId,
        code: &ReservationCode,
    ) -> Result<Option<Reservation>, GatewayError> {
        Ok(self.staged.iter().find(|row| &row.venue_id == venue && &row.code == code).cloned())
    }

    async fn insert_confirmed(
        &mut self,
        reservation: Reservation,
    ) -> Result<Reservation, GatewayError> {
        let clash = self.staged.iter().any(|row| {
            (row.venue_id == reservation.venue_id && row.code == reservation.code)
                || (row.is_confirmed()
                    && row.client_id == reservation.client_id
                    && row.venue_id == reservation.venue_id
                    && row.slot.start == reservation.slot.start)
        });
        if clash {
            return Err(GatewayError::Conflict(format!(
                "reservation `{}` clashes with an existing row",
                reservation.code
            )));
        }

        self.staged.push(reservation.clone());
        Ok(reservation)
    }

    async fn update_reservation(
        &mut self,
        venue: &VenueId,
        code: &ReservationCode,
        patch: &ReservationPatch,
    ) -> Result<Reservation, GatewayError> {
        let row = self
            .staged
            .iter_mut()
            .find(|row| &row.venue_id == venue && &row.code == code)
            .ok_or_else(|| GatewayError::NotFound(format!("reservation `{code}`")))?;
        patch.apply(row, Utc::now());
        Ok(row.clone())
    }

    async fn commit(self: Box<Self>) -> Result<(), GatewayError> {
        let InMemoryUnitOfWork { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryClientDirectory {
    clients: Arc<RwLock<HashMap<ClientId, Client>>>,
}

#[async_trait]
impl ClientDirectory for InMemoryClientDirectory {
    async fn find(&self, id: &ClientId) -> Result<Option<Client>, GatewayError> {
        Ok(self.clients.read().await.get(id).cloned())
    }

    async fn register(&self, client: Client) -> Result<Client, GatewayError> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&client.id) {
            return Err(GatewayError::Conflict(format!("client `{}` already exists", client.id.0)));
        }
        clients.insert(client.id.clone(), client.clone());
        Ok(client)
    }

    async fn set_email(&self, id: &ClientId, email: &str) -> Result<Client, GatewayError> {
        let mut clients = self.clients.write().await;
        let client = clients
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(format!("client `{}`", id.0)))?;
        client.email = Some(email.to_owned());
        Ok(client.clone())
    }
}
