use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::booking::code::{CodeGenerationError, CodeGenerator};
use crate::booking::gateway::{GatewayError, OverlapQuery, ReservationUnitOfWork};
use crate::domain::client::ClientId;
use crate::domain::reservation::{
    Reservation, ReservationCode, ReservationPatch, ReservationStatus, Slot,
};
use crate::domain::venue::{CapacityMode, VenueConfig};
use crate::errors::{ApplicationError, ConflictKind, DomainError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationRequest {
    pub client_id: ClientId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    /// Signed so that zero and negative input reach the allocator's own check.
    pub party_size: i64,
    pub note: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionReason {
    InvalidPartySize,
    DuplicateBooking,
    NoSuitableTable,
    TableClassExhausted,
    CapacityExceeded,
}

impl RejectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPartySize => "invalid_party_size",
            Self::DuplicateBooking => "duplicate_booking",
            Self::NoSuitableTable => "no_suitable_table",
            Self::TableClassExhausted => "table_class_exhausted",
            Self::CapacityExceeded => "capacity_exceeded",
        }
    }
}

impl From<RejectionReason> for ApplicationError {
    fn from(value: RejectionReason) -> Self {
        match value {
            RejectionReason::InvalidPartySize => Self::Domain(DomainError::Validation(
                "party size must be a positive number".to_owned(),
            )),
            RejectionReason::DuplicateBooking => Self::Conflict(ConflictKind::DuplicateBooking),
            RejectionReason::NoSuitableTable => Self::Conflict(ConflictKind::NoSuitableTable),
            RejectionReason::TableClassExhausted => {
                Self::Conflict(ConflictKind::TableClassExhausted)
            }
            RejectionReason::CapacityExceeded => Self::Conflict(ConflictKind::CapacityExceeded),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Admission {
    pub reservation: Reservation,
    /// Set when warning mode let the booking through above venue capacity.
    pub soft_limit_breached: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocationDecision {
    Admitted(Admission),
    Rejected(RejectionReason),
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("venue configuration error: {0}")]
    Configuration(#[from] DomainError),
    #[error(transparent)]
    CodeGeneration(#[from] CodeGenerationError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl From<AllocationError> for ApplicationError {
    fn from(value: AllocationError) -> Self {
        match value {
            AllocationError::Configuration(error) => Self::Configuration(error.to_string()),
            AllocationError::CodeGeneration(error) => Self::CodeGeneration(error.to_string()),
            AllocationError::Gateway(error) => error.into(),
        }
    }
}

struct Placement {
    table_capacity: u32,
    soft_limit_breached: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CapacityAllocator {
    codes: CodeGenerator,
}

impl CapacityAllocator {
    pub fn new(codes: CodeGenerator) -> Self {
        Self { codes }
    }

    /// Checks duplicate, table-class and venue-capacity limits and, when all
    /// pass, stores a confirmed reservation with a fresh code. Must run inside
    /// a unit of work the caller commits or rolls back.
    pub async fn try_allocate(
        &self,
        uow: &mut dyn ReservationUnitOfWork,
        venue: &VenueConfig,
        request: &AllocationRequest,
        now: DateTime<Utc>,
    ) -> Result<AllocationDecision, AllocationError> {
        let Some(party_size) = positive_party_size(request.party_size) else {
            return Ok(AllocationDecision::Rejected(RejectionReason::InvalidPartySize));
        };
        let slot = Slot::starting_at(request.date, request.start_time, venue.slot_duration()?);

        let exact = uow
            .find_exact(&request.client_id, &venue.id, request.date, request.start_time)
            .await?;
        if exact.is_some() {
            return Ok(AllocationDecision::Rejected(RejectionReason::DuplicateBooking));
        }

        let placement = match self.place(uow, venue, &slot, party_size, None).await? {
            Ok(placement) => placement,
            Err(reason) => return Ok(AllocationDecision::Rejected(reason)),
        };

        let code = self.codes.generate(uow, venue, request.date).await?;
        let reservation = Reservation {
            code,
            client_id: request.client_id.clone(),
            venue_id: venue.id.clone(),
            slot,
            party_size,
            table_capacity: placement.table_capacity,
            status: ReservationStatus::Confirmed,
            note: request.note.clone(),
            created_at: now,
            updated_at: now,
        };
        let stored = uow.insert_confirmed(reservation).await?;

        Ok(AllocationDecision::Admitted(Admission {
            reservation: stored,
            soft_limit_breached: placement.soft_limit_breached,
        }))
    }

    /// Same checks as `try_allocate` for moving an existing reservation. The
    /// reservation itself is left out of every overlap and duplicate check and
    /// keeps its code.
    pub async fn try_reallocate(
        &self,
        uow: &mut dyn ReservationUnitOfWork,
        venue: &VenueConfig,
        existing: &Reservation,
        date: NaiveDate,
        start_time: NaiveTime,
        party_size: i64,
    ) -> Result<AllocationDecision, AllocationError> {
        let Some(party_size) = positive_party_size(party_size) else {
            return Ok(AllocationDecision::Rejected(RejectionReason::InvalidPartySize));
        };
        let slot = Slot::starting_at(date, start_time, venue.slot_duration()?);

        let exact = uow.find_exact(&existing.client_id, &venue.id, date, start_time).await?;
        if exact.is_some_and(|other| other.code != existing.code) {
            return Ok(AllocationDecision::Rejected(RejectionReason::DuplicateBooking));
        }

        let placement =
            match self.place(uow, venue, &slot, party_size, Some(&existing.code)).await? {
                Ok(placement) => placement,
                Err(reason) => return Ok(AllocationDecision::Rejected(reason)),
            };

        let patch = ReservationPatch {
            slot: Some(slot),
            party_size: Some(party_size),
            table_capacity: Some(placement.table_capacity),
            status: None,
        };
        let updated = uow.update_reservation(&venue.id, &existing.code, &patch).await?;

        Ok(AllocationDecision::Admitted(Admission {
            reservation: updated,
            soft_limit_breached: placement.soft_limit_breached,
        }))
    }

    async fn place(
        &self,
        uow: &mut dyn ReservationUnitOfWork,
        venue: &VenueConfig,
        slot: &Slot,
        party_size: u32,
        exclude: Option<&ReservationCode>,
    ) -> Result<Result<Placement, RejectionReason>, AllocationError> {
        let Some(class) = venue.smallest_fitting_class(party_size) else {
            return Ok(Err(RejectionReason::NoSuitableTable));
        };

        let same_class = uow
            .find_overlapping(&OverlapQuery {
                venue: venue.id.clone(),
                table_capacity: Some(class.capacity),
                slot: *slot,
                exclude: exclude.cloned(),
            })
            .await?;
        if same_class.len() as u64 >= u64::from(class.quantity) {
            return Ok(Err(RejectionReason::TableClassExhausted));
        }

        let mut placement =
            Placement { table_capacity: class.capacity, soft_limit_breached: false };
        if venue.capacity_mode == CapacityMode::Disabled {
            return Ok(Ok(placement));
        }

        let overlapping = uow
            .find_overlapping(&OverlapQuery {
                venue: venue.id.clone(),
                table_capacity: None,
                slot: *slot,
                exclude: exclude.cloned(),
            })
            .await?;
        let occupied: u64 = overlapping.iter().map(|row| u64::from(row.party_size)).sum();
        let limit = venue.effective_capacity(slot.date());

        if occupied + u64::from(party_size) > u64::from(limit) {
            if venue.capacity_mode == CapacityMode::Strict {
                return Ok(Err(RejectionReason::CapacityExceeded));
            }
            warn!(
                event_name = "booking.capacity.soft_limit_breached",
                venue_id = %venue.id.0,
                date = %slot.date(),
                start = %slot.start_time(),
                occupied,
                requested = party_size,
                limit,
                "admitting reservation above venue capacity"
            );
            placement.soft_limit_breached = true;
        }

        Ok(Ok(placement))
    }
}

fn positive_party_size(value: i64) -> Option<u32> {
    if value <= 0 {
        return None;
    }
    u32::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

    use super::{
        AllocationDecision, AllocationError, AllocationRequest, CapacityAllocator, RejectionReason,
    };
    use crate::booking::code::{CodeGenerator, CodeScope, ScopeTag};
    use crate::booking::gateway::{ReservationGateway, ReservationUnitOfWork};
    use crate::booking::memory::InMemoryReservationGateway;
    use crate::domain::client::ClientId;
    use crate::domain::reservation::{Reservation, ReservationCode, ReservationStatus, Slot};
    use crate::domain::venue::{CapacityMode, TableClass, VenueConfig, VenueId};

    fn venue(mode: CapacityMode, max_capacity: u32, tables: Vec<TableClass>) -> VenueConfig {
        VenueConfig {
            id: VenueId("centro".to_owned()),
            branch_code: 3,
            max_capacity,
            slot_minutes: 90,
            capacity_mode: mode,
            capacity_overrides: BTreeMap::new(),
            tables,
        }
    }

    fn standard_inventory() -> Vec<TableClass> {
        vec![TableClass { capacity: 2, quantity: 10 }, TableClass { capacity: 4, quantity: 5 }]
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 12).expect("date")
    }

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("time")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).single().expect("timestamp")
    }

    fn request(client: &str, time: NaiveTime, party_size: i64) -> AllocationRequest {
        AllocationRequest {
            client_id: ClientId(client.to_owned()),
            date: date(),
            start_time: time,
            party_size,
            note: None,
        }
    }

    fn existing(
        code: &str,
        client: &str,
        time: NaiveTime,
        party_size: u32,
        table_capacity: u32,
        status: ReservationStatus,
    ) -> Reservation {
        Reservation {
            code: ReservationCode(code.to_owned()),
            client_id: ClientId(client.to_owned()),
            venue_id: VenueId("centro".to_owned()),
            slot: Slot::starting_at(date(), time, chrono::Duration::minutes(90)),
            party_size,
            table_capacity,
            status,
            note: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    async fn allocate(
        gateway: &InMemoryReservationGateway,
        venue: &VenueConfig,
        request: &AllocationRequest,
    ) -> Result<AllocationDecision, AllocationError> {
        let allocator = CapacityAllocator::default();
        let mut uow = gateway.begin().await.expect("begin");
        let decision = allocator.try_allocate(uow.as_mut(), venue, request, now()).await;
        uow.commit().await.expect("commit");
        decision
    }

    async fn try_book(
        gateway: &InMemoryReservationGateway,
        venue: &VenueConfig,
        time: NaiveTime,
        party_size: i64,
    ) -> Result<AllocationDecision, AllocationError> {
        allocate(gateway, venue, &request("30111222", time, party_size)).await
    }

    fn rejection(decision: Result<AllocationDecision, AllocationError>) -> RejectionReason {
        match decision.expect("allocation runs") {
            AllocationDecision::Rejected(reason) => reason,
            AllocationDecision::Admitted(admission) => {
                panic!("expected rejection, admitted {:?}", admission.reservation.code)
            }
        }
    }

    fn admitted(decision: Result<AllocationDecision, AllocationError>) -> super::Admission {
        match decision.expect("allocation runs") {
            AllocationDecision::Admitted(admission) => admission,
            AllocationDecision::Rejected(reason) => panic!("expected admission, got {reason:?}"),
        }
    }

    async fn seed_four_tops(gateway: &InMemoryReservationGateway, count: usize, time: NaiveTime) {
        for index in 0..count {
            gateway
                .seed(existing(
                    &format!("RC-26-0312-{:04}", index + 1),
                    &format!("2000000{index}"),
                    time,
                    4,
                    4,
                    ReservationStatus::Confirmed,
                ))
                .await;
        }
    }

    #[tokio::test]
    async fn admits_into_smallest_fitting_class_with_first_code() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(CapacityMode::Strict, 60, standard_inventory());

        let admission = admitted(try_book(&gateway, &venue, at(21, 0), 3).await);

        assert_eq!(admission.reservation.table_capacity, 4);
        assert_eq!(admission.reservation.code.as_str(), "RC-26-0312-0001");
        assert_eq!(admission.reservation.end_time(), at(22, 30));
        assert_eq!(admission.reservation.status, ReservationStatus::Confirmed);
        assert!(!admission.soft_limit_breached);
    }

    #[tokio::test]
    async fn full_table_class_rejects_but_smaller_class_still_admits() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(CapacityMode::Strict, 60, standard_inventory());
        seed_four_tops(&gateway, 5, at(21, 0)).await;

        let three = rejection(try_book(&gateway, &venue, at(21, 0), 3).await);
        assert_eq!(three, RejectionReason::TableClassExhausted);

        let two = admitted(try_book(&gateway, &venue, at(21, 0), 2).await);
        assert_eq!(two.reservation.table_capacity, 2);
    }

    #[tokio::test]
    async fn overlap_is_half_open() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(CapacityMode::Strict, 60, vec![TableClass { capacity: 4, quantity: 1 }]);
        seed_four_tops(&gateway, 1, at(20, 0)).await;

        let inside = rejection(try_book(&gateway, &venue, at(21, 0), 4).await);
        assert_eq!(inside, RejectionReason::TableClassExhausted);

        let touching = try_book(&gateway, &venue, at(21, 30), 4).await;
        assert_eq!(admitted(touching).reservation.start_time(), at(21, 30));
    }

    #[tokio::test]
    async fn strict_mode_rejects_over_capacity_and_override_lifts_limit() {
        let gateway = InMemoryReservationGateway::default();
        let mut venue = venue(CapacityMode::Strict, 20, standard_inventory());
        seed_four_tops(&gateway, 4, at(20, 0)).await;
        gateway
            .seed(existing(
                "RC-26-0312-0005",
                "20000009",
                at(20, 0),
                2,
                2,
                ReservationStatus::Confirmed,
            ))
            .await;

        let rejected = rejection(try_book(&gateway, &venue, at(20, 0), 3).await);
        assert_eq!(rejected, RejectionReason::CapacityExceeded);

        venue.capacity_overrides.insert(date(), 30);
        let admission = admitted(try_book(&gateway, &venue, at(20, 0), 3).await);
        assert!(!admission.soft_limit_breached);
    }

    #[tokio::test]
    async fn warning_mode_admits_with_soft_limit_flag() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(CapacityMode::Warning, 8, standard_inventory());
        seed_four_tops(&gateway, 2, at(20, 0)).await;

        let admission = admitted(try_book(&gateway, &venue, at(20, 30), 2).await);
        assert!(admission.soft_limit_breached);
    }

    #[tokio::test]
    async fn disabled_mode_skips_people_sum() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(CapacityMode::Disabled, 4, standard_inventory());
        seed_four_tops(&gateway, 2, at(20, 0)).await;

        let admission = admitted(try_book(&gateway, &venue, at(20, 0), 4).await);
        assert!(!admission.soft_limit_breached);
    }

    #[tokio::test]
    async fn cancelled_reservations_do_not_occupy_tables() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(CapacityMode::Strict, 60, vec![TableClass { capacity: 4, quantity: 1 }]);
        gateway
            .seed(existing(
                "RC-26-0312-0001",
                "20000001",
                at(20, 0),
                4,
                4,
                ReservationStatus::Cancelled,
            ))
            .await;

        let admission = admitted(try_book(&gateway, &venue, at(20, 0), 4).await);
        assert_eq!(admission.reservation.code.as_str(), "RC-26-0312-0002");
    }

    #[tokio::test]
    async fn non_positive_party_size_is_rejected() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(CapacityMode::Strict, 60, standard_inventory());

        for party_size in [0, -1] {
            let reason =
                rejection(try_book(&gateway, &venue, at(20, 0), party_size).await);
            assert_eq!(reason, RejectionReason::InvalidPartySize);
        }
        assert!(gateway.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn party_larger_than_every_table_is_rejected() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(CapacityMode::Strict, 60, standard_inventory());

        let reason = rejection(try_book(&gateway, &venue, at(20, 0), 5).await);
        assert_eq!(reason, RejectionReason::NoSuitableTable);
    }

    #[tokio::test]
    async fn same_client_same_slot_is_a_duplicate() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(CapacityMode::Strict, 60, standard_inventory());

        admitted(try_book(&gateway, &venue, at(20, 0), 2).await);
        let reason = rejection(try_book(&gateway, &venue, at(20, 0), 2).await);
        assert_eq!(reason, RejectionReason::DuplicateBooking);
    }

    #[tokio::test]
    async fn zero_slot_duration_is_a_configuration_error() {
        let gateway = InMemoryReservationGateway::default();
        let mut venue = venue(CapacityMode::Strict, 60, standard_inventory());
        venue.slot_minutes = 0;

        let error = allocate(&gateway, &venue, &request("30111222", at(20, 0), 2))
            .await
            .expect_err("zero slot");
        assert!(matches!(error, AllocationError::Configuration(_)));
    }

    #[tokio::test]
    async fn codes_are_sequential_within_scope() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(CapacityMode::Strict, 60, standard_inventory());

        let first = admitted(try_book(&gateway, &venue, at(20, 0), 2).await);
        let second = admitted(allocate(&gateway, &venue, &request("30111333", at(20, 0), 2)).await);
        assert_eq!(first.reservation.code.as_str(), "RC-26-0312-0001");
        assert_eq!(second.reservation.code.as_str(), "RC-26-0312-0002");

        let mut next_day = request("30111222", at(20, 0), 2);
        next_day.date = NaiveDate::from_ymd_opt(2026, 3, 13).expect("date");
        let third = admitted(allocate(&gateway, &venue, &next_day).await);
        assert_eq!(third.reservation.code.as_str(), "RC-26-0313-0001");
    }

    #[tokio::test]
    async fn ordinal_overflow_fails_code_generation() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(
            CapacityMode::Disabled,
            60,
            vec![TableClass { capacity: 10_000, quantity: 10_000 }],
        );
        for index in 0..9_999u32 {
            let mut row = existing(
                &format!("RC-26-0312-{:04}", index + 1),
                &format!("{:08}", index),
                at(10, 0),
                1,
                10_000,
                ReservationStatus::Confirmed,
            );
            row.slot = Slot::starting_at(date(), at(0, 0), chrono::Duration::minutes(1));
            gateway.seed(row).await;
        }

        let error = allocate(&gateway, &venue, &request("30111222", at(20, 0), 2))
            .await
            .expect_err("no ordinal left");
        assert!(matches!(error, AllocationError::CodeGeneration(_)));
    }

    #[tokio::test]
    async fn branch_tag_and_venue_scope_are_honored() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(CapacityMode::Strict, 60, standard_inventory());
        let allocator =
            CapacityAllocator::new(CodeGenerator::new(CodeScope::Venue, ScopeTag::Branch));
        gateway
            .seed(existing(
                "RC-003-0301-0001",
                "20000001",
                at(20, 0),
                2,
                2,
                ReservationStatus::Confirmed,
            ))
            .await;

        let mut uow = gateway.begin().await.expect("begin");
        let decision = allocator
            .try_allocate(uow.as_mut(), &venue, &request("30111222", at(20, 0), 2), now())
            .await;
        uow.commit().await.expect("commit");

        assert_eq!(admitted(decision).reservation.code.as_str(), "RC-003-0312-0002");
    }

    #[tokio::test]
    async fn rolled_back_unit_of_work_discards_insert() {
        let gateway = InMemoryReservationGateway::default();
        let venue = venue(CapacityMode::Strict, 60, standard_inventory());
        let allocator = CapacityAllocator::default();

        let mut uow = gateway.begin().await.expect("begin");
        let decision = allocator
            .try_allocate(uow.as_mut(), &venue, &request("30111222", at(20, 0), 2), now())
            .await;
        assert!(matches!(decision, Ok(AllocationDecision::Admitted(_))));
        uow.rollback().await.expect("rollback");

        assert!(gateway.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_requests_never_overbook_a_table_class() {
        let gateway = InMemoryReservationGateway::default();
        let inventory = vec![TableClass { capacity: 4, quantity: 3 }];
        let venue = Arc::new(venue(CapacityMode::Strict, 60, inventory));

        let mut tasks = Vec::new();
        for index in 0..12 {
            let gateway = gateway.clone();
            let venue = Arc::clone(&venue);
            tasks.push(tokio::spawn(async move {
                let client = format!("300000{index:02}");
                allocate(&gateway, &venue, &request(&client, at(21, 0), 4)).await
            }));
        }

        let mut admitted_count = 0;
        for task in tasks {
            if let Ok(AllocationDecision::Admitted(_)) = task.await.expect("task joins") {
                admitted_count += 1;
            }
        }

        assert_eq!(admitted_count, 3);
        assert_eq!(gateway.snapshot().await.len(), 3);
    }
}
