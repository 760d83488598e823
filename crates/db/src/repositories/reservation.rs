use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, SqliteConnection};

use turnero_core::booking::{
    CountScope, GatewayError, OverlapQuery, OverlapRow, ReservationGateway, ReservationUnitOfWork,
};
use turnero_core::domain::client::ClientId;
use turnero_core::domain::reservation::{
    Reservation, ReservationCode, ReservationPatch, ReservationStatus, Slot,
};
use turnero_core::domain::venue::VenueId;

use super::{
    column, format_date, format_slot_bound, parse_slot_bound, parse_timestamp, to_u32,
    RepositoryError,
};
use crate::DbPool;

const RESERVATION_COLUMNS: &str = "venue_id, code, client_id, start_at, end_at, party_size,
    table_capacity, status, note, created_at, updated_at";

pub struct SqlReservationGateway {
    pool: DbPool,
}

impl SqlReservationGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationGateway for SqlReservationGateway {
    async fn begin(&self) -> Result<Box<dyn ReservationUnitOfWork>, GatewayError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await.map_err(RepositoryError::from)?;
        Ok(Box::new(SqlUnitOfWork { conn, open: true }))
    }

    async fn find_by_code(
        &self,
        venue: &VenueId,
        code: &ReservationCode,
    ) -> Result<Option<Reservation>, GatewayError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(select_by_code(&mut conn, venue, code).await?)
    }

    async fn list_upcoming_for_client(
        &self,
        client: &ClientId,
        from: NaiveDate,
    ) -> Result<Vec<Reservation>, GatewayError> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservation
             WHERE client_id = ? AND status = 'confirmed' AND reservation_date >= ?
             ORDER BY start_at ASC"
        ))
        .bind(&client.0)
        .bind(format_date(from))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_reservation).collect::<Result<Vec<_>, _>>()?)
    }
}

/// A pooled connection holding an open `BEGIN IMMEDIATE` transaction. SQLite
/// grants one such writer at a time, so count, overlap, and insert statements
/// of concurrent allocations never interleave.
pub struct SqlUnitOfWork {
    conn: PoolConnection<Sqlite>,
    open: bool,
}

impl SqlUnitOfWork {
    async fn finish(mut self, statement: &str) -> Result<(), GatewayError> {
        sqlx::query(statement).execute(&mut *self.conn).await.map_err(RepositoryError::from)?;
        self.open = false;
        Ok(())
    }
}

impl Drop for SqlUnitOfWork {
    fn drop(&mut self) {
        // Closing the connection makes SQLite roll the transaction back.
        if self.open {
            self.conn.close_on_drop();
        }
    }
}

#[async_trait]
impl ReservationUnitOfWork for SqlUnitOfWork {
    async fn count_confirmed(&mut self, scope: &CountScope) -> Result<u32, GatewayError> {
        let count: i64 = match scope {
            CountScope::VenueDay { venue, date } => sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM reservation
                 WHERE status = 'confirmed' AND venue_id = ? AND reservation_date = ?",
            )
            .bind(&venue.0)
            .bind(format_date(*date))
            .fetch_one(&mut *self.conn)
            .await,
            CountScope::Venue { venue } => sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM reservation WHERE status = 'confirmed' AND venue_id = ?",
            )
            .bind(&venue.0)
            .fetch_one(&mut *self.conn)
            .await,
            CountScope::Global => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM reservation WHERE status = 'confirmed'",
                )
                .fetch_one(&mut *self.conn)
                .await
            }
        }
        .map_err(RepositoryError::from)?;

        Ok(to_u32(count, "confirmed count")?)
    }

    async fn code_exists(
        &mut self,
        venue: Option<&VenueId>,
        code: &ReservationCode,
    ) -> Result<bool, GatewayError> {
        let venue_id = venue.map(|venue| venue.0.as_str());
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservation WHERE code = ? AND (? IS NULL OR venue_id = ?)",
        )
        .bind(&code.0)
        .bind(venue_id)
        .bind(venue_id)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(RepositoryError::from)?;

        Ok(count > 0)
    }

    async fn find_overlapping(
        &mut self,
        query: &OverlapQuery,
    ) -> Result<Vec<OverlapRow>, GatewayError> {
        let table_capacity = query.table_capacity.map(i64::from);
        let exclude = query.exclude.as_ref().map(|code| code.0.as_str());
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT party_size, table_capacity FROM reservation
             WHERE venue_id = ? AND status = 'confirmed'
               AND start_at < ? AND end_at > ?
               AND (? IS NULL OR table_capacity = ?)
               AND (? IS NULL OR code <> ?)",
        )
        .bind(&query.venue.0)
        .bind(format_slot_bound(query.slot.end))
        .bind(format_slot_bound(query.slot.start))
        .bind(table_capacity)
        .bind(table_capacity)
        .bind(exclude)
        .bind(exclude)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(RepositoryError::from)?;

        let overlapping = rows
            .into_iter()
            .map(|(party_size, table_capacity)| {
                Ok(OverlapRow {
                    party_size: to_u32(party_size, "party_size")?,
                    table_capacity: to_u32(table_capacity, "table_capacity")?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        Ok(overlapping)
    }

    async fn find_exact(
        &mut self,
        client: &ClientId,
        venue: &VenueId,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<Option<Reservation>, GatewayError> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservation
             WHERE client_id = ? AND venue_id = ? AND start_at = ? AND status = 'confirmed'"
        ))
        .bind(&client.0)
        .bind(&venue.0)
        .bind(format_slot_bound(date.and_time(start_time)))
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_reservation).transpose()?)
    }

    async fn find_by_code(
        &mut self,
        venue: &VenueId,
        code: &ReservationCode,
    ) -> Result<Option<Reservation>, GatewayError> {
        Ok(select_by_code(&mut self.conn, venue, code).await?)
    }

    async fn insert_confirmed(
        &mut self,
        reservation: Reservation,
    ) -> Result<Reservation, GatewayError> {
        sqlx::query(
            "INSERT INTO reservation (venue_id, code, client_id, reservation_date, start_at,
                                      end_at, party_size, table_capacity, status, note,
                                      created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&reservation.venue_id.0)
        .bind(&reservation.code.0)
        .bind(&reservation.client_id.0)
        .bind(format_date(reservation.date()))
        .bind(format_slot_bound(reservation.slot.start))
        .bind(format_slot_bound(reservation.slot.end))
        .bind(i64::from(reservation.party_size))
        .bind(i64::from(reservation.table_capacity))
        .bind(ReservationStatus::Confirmed.as_str())
        .bind(&reservation.note)
        .bind(reservation.created_at.to_rfc3339())
        .bind(reservation.updated_at.to_rfc3339())
        .execute(&mut *self.conn)
        .await
        .map_err(RepositoryError::from)?;

        Ok(reservation)
    }

    async fn update_reservation(
        &mut self,
        venue: &VenueId,
        code: &ReservationCode,
        patch: &ReservationPatch,
    ) -> Result<Reservation, GatewayError> {
        let mut reservation = select_by_code(&mut self.conn, venue, code)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("reservation `{code}`")))?;
        patch.apply(&mut reservation, Utc::now());

        sqlx::query(
            "UPDATE reservation
             SET reservation_date = ?, start_at = ?, end_at = ?, party_size = ?,
                 table_capacity = ?, status = ?, updated_at = ?
             WHERE venue_id = ? AND code = ?",
        )
        .bind(format_date(reservation.date()))
        .bind(format_slot_bound(reservation.slot.start))
        .bind(format_slot_bound(reservation.slot.end))
        .bind(i64::from(reservation.party_size))
        .bind(i64::from(reservation.table_capacity))
        .bind(reservation.status.as_str())
        .bind(reservation.updated_at.to_rfc3339())
        .bind(&venue.0)
        .bind(&code.0)
        .execute(&mut *self.conn)
        .await
        .map_err(RepositoryError::from)?;

        Ok(reservation)
    }

    async fn commit(self: Box<Self>) -> Result<(), GatewayError> {
        (*self).finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<(), GatewayError> {
        (*self).finish("ROLLBACK").await
    }
}

async fn select_by_code(
    conn: &mut SqliteConnection,
    venue: &VenueId,
    code: &ReservationCode,
) -> Result<Option<Reservation>, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservation WHERE venue_id = ? AND code = ?"
    ))
    .bind(&venue.0)
    .bind(&code.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_reservation).transpose()
}

fn row_to_reservation(row: &SqliteRow) -> Result<Reservation, RepositoryError> {
    let status_raw: String = column(row, "status")?;
    let status = ReservationStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status_raw}`")))?;
    let start_at: String = column(row, "start_at")?;
    let end_at: String = column(row, "end_at")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(Reservation {
        code: ReservationCode(column(row, "code")?),
        client_id: ClientId(column(row, "client_id")?),
        venue_id: VenueId(column(row, "venue_id")?),
        slot: Slot { start: parse_slot_bound(&start_at)?, end: parse_slot_bound(&end_at)? },
        party_size: to_u32(column(row, "party_size")?, "party_size")?,
        table_capacity: to_u32(column(row, "table_capacity")?, "table_capacity")?,
        status,
        note: column(row, "note")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use tempfile::TempDir;

    use turnero_core::booking::{
        AllocationDecision, AllocationRequest, BookingService, CapacityAllocator, ClientDirectory,
        CountScope, GatewayError, OverlapQuery, ReservationGateway, StaticVenueCatalog,
    };
    use turnero_core::domain::client::{Client, ClientId};
    use turnero_core::domain::reservation::{
        Reservation, ReservationCode, ReservationPatch, ReservationStatus, Slot,
    };
    use turnero_core::domain::venue::{CapacityMode, TableClass, VenueConfig, VenueId};

    use super::SqlReservationGateway;
    use crate::repositories::SqlClientDirectory;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    async fn register(pool: &DbPool, id: &str) {
        let directory = SqlClientDirectory::new(pool.clone());
        let client =
            Client::register(ClientId(id.to_string()), "Ana Perez", "5491100000000", Utc::now())
                .expect("client");
        directory.register(client).await.expect("register client");
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 12).expect("date")
    }

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("time")
    }

    fn reservation(code: &str, client: &str, start: NaiveTime, party_size: u32) -> Reservation {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("timestamp");
        Reservation {
            code: ReservationCode(code.to_string()),
            client_id: ClientId(client.to_string()),
            venue_id: VenueId("principal".to_string()),
            slot: Slot::starting_at(day(), start, chrono::Duration::minutes(90)),
            party_size,
            table_capacity: 4,
            status: ReservationStatus::Confirmed,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn venue(quantity: u32) -> VenueConfig {
        VenueConfig {
            id: VenueId("principal".to_string()),
            branch_code: 1,
            max_capacity: 100,
            slot_minutes: 90,
            capacity_mode: CapacityMode::Strict,
            capacity_overrides: Default::default(),
            tables: vec![TableClass { capacity: 4, quantity }],
        }
    }

    #[tokio::test]
    async fn insert_then_find_round_trips_every_column() {
        let pool = setup().await;
        register(&pool, "30111222").await;
        let gateway = SqlReservationGateway::new(pool);

        let mut uow = gateway.begin().await.expect("begin");
        let mut stored = reservation("RC-26-0312-0001", "30111222", at(21, 0), 3);
        stored.note = Some("ventana".to_string());
        uow.insert_confirmed(stored.clone()).await.expect("insert");
        uow.commit().await.expect("commit");

        let found = gateway
            .find_by_code(&VenueId("principal".to_string()), &stored.code)
            .await
            .expect("find")
            .expect("row exists");
        assert_eq!(found, stored);
    }

    #[tokio::test]
    async fn late_slot_spills_into_next_day_and_still_overlaps() {
        let pool = setup().await;
        register(&pool, "30111222").await;
        let gateway = SqlReservationGateway::new(pool);

        let mut uow = gateway.begin().await.expect("begin");
        uow.insert_confirmed(reservation("RC-26-0312-0001", "30111222", at(23, 30), 2))
            .await
            .expect("insert");

        let next_morning = NaiveDate::from_ymd_opt(2026, 3, 13).expect("date");
        let early = Slot::starting_at(next_morning, at(0, 30), chrono::Duration::minutes(90));
        let rows = uow
            .find_overlapping(&OverlapQuery {
                venue: VenueId("principal".to_string()),
                table_capacity: None,
                slot: early,
                exclude: None,
            })
            .await
            .expect("overlap");
        assert_eq!(rows.len(), 1);

        let after = Slot::starting_at(next_morning, at(1, 0), chrono::Duration::minutes(90));
        let rows = uow
            .find_overlapping(&OverlapQuery {
                venue: VenueId("principal".to_string()),
                table_capacity: Some(4),
                slot: after,
                exclude: None,
            })
            .await
            .expect("overlap");
        assert!(rows.is_empty(), "half-open slots that touch do not overlap");
        uow.rollback().await.expect("rollback");
    }

    #[tokio::test]
    async fn count_scopes_ignore_cancelled_rows() {
        let pool = setup().await;
        register(&pool, "30111222").await;
        register(&pool, "30111223").await;
        let gateway = SqlReservationGateway::new(pool);
        let venue_id = VenueId("principal".to_string());

        let mut uow = gateway.begin().await.expect("begin");
        uow.insert_confirmed(reservation("RC-26-0312-0001", "30111222", at(20, 0), 2))
            .await
            .expect("insert");
        uow.insert_confirmed(reservation("RC-26-0312-0002", "30111223", at(20, 0), 2))
            .await
            .expect("insert");
        uow.update_reservation(
            &venue_id,
            &ReservationCode("RC-26-0312-0002".to_string()),
            &ReservationPatch { status: Some(ReservationStatus::Cancelled), ..Default::default() },
        )
        .await
        .expect("cancel");

        let day_count = uow
            .count_confirmed(&CountScope::VenueDay { venue: venue_id.clone(), date: day() })
            .await
            .expect("count");
        let global_count = uow.count_confirmed(&CountScope::Global).await.expect("count");
        let cancelled_code_taken = uow
            .code_exists(Some(&venue_id), &ReservationCode("RC-26-0312-0002".to_string()))
            .await
            .expect("exists");
        uow.commit().await.expect("commit");

        assert_eq!(day_count, 1);
        assert_eq!(global_count, 1);
        assert!(cancelled_code_taken);
    }

    #[tokio::test]
    async fn duplicate_confirmed_slot_for_same_client_is_a_conflict() {
        let pool = setup().await;
        register(&pool, "30111222").await;
        let gateway = SqlReservationGateway::new(pool);

        let mut uow = gateway.begin().await.expect("begin");
        uow.insert_confirmed(reservation("RC-26-0312-0001", "30111222", at(20, 0), 2))
            .await
            .expect("insert");
        let error = uow
            .insert_confirmed(reservation("RC-26-0312-0002", "30111222", at(20, 0), 2))
            .await
            .expect_err("partial unique index rejects the second row");
        uow.rollback().await.expect("rollback");

        assert!(matches!(error, GatewayError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_of_unknown_code_is_not_found() {
        let pool = setup().await;
        let gateway = SqlReservationGateway::new(pool);

        let mut uow = gateway.begin().await.expect("begin");
        let error = uow
            .update_reservation(
                &VenueId("principal".to_string()),
                &ReservationCode("RC-26-0312-0009".to_string()),
                &ReservationPatch::default(),
            )
            .await
            .expect_err("missing row");
        uow.rollback().await.expect("rollback");

        assert!(matches!(error, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn dropped_unit_of_work_discards_writes() {
        let dir = TempDir::new().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("turnero.db").display());
        let pool = connect_with_settings(&url, 2, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        register(&pool, "30111222").await;
        let gateway = SqlReservationGateway::new(pool);

        {
            let mut uow = gateway.begin().await.expect("begin");
            uow.insert_confirmed(reservation("RC-26-0312-0001", "30111222", at(20, 0), 2))
                .await
                .expect("insert");
        }

        let mut uow = gateway.begin().await.expect("begin after drop");
        let count = uow.count_confirmed(&CountScope::Global).await.expect("count");
        uow.rollback().await.expect("rollback");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn upcoming_lists_only_future_confirmed_rows_in_order() {
        let pool = setup().await;
        register(&pool, "30111222").await;
        let gateway = SqlReservationGateway::new(pool);

        let mut uow = gateway.begin().await.expect("begin");
        uow.insert_confirmed(reservation("RC-26-0312-0002", "30111222", at(22, 0), 2))
            .await
            .expect("insert");
        uow.insert_confirmed(reservation("RC-26-0312-0001", "30111222", at(19, 0), 2))
            .await
            .expect("insert");
        uow.commit().await.expect("commit");

        let upcoming = gateway
            .list_upcoming_for_client(&ClientId("30111222".to_string()), day())
            .await
            .expect("list");
        let codes: Vec<&str> = upcoming.iter().map(|row| row.code.as_str()).collect();
        assert_eq!(codes, vec!["RC-26-0312-0001", "RC-26-0312-0002"]);

        let later = gateway
            .list_upcoming_for_client(
                &ClientId("30111222".to_string()),
                NaiveDate::from_ymd_opt(2026, 3, 13).expect("date"),
            )
            .await
            .expect("list");
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn concurrent_bookings_on_a_file_database_never_overbook() {
        let dir = TempDir::new().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("turnero.db").display());
        let pool = connect_with_settings(&url, 8, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        for index in 0..10 {
            register(&pool, &format!("300000{index:02}")).await;
        }

        let service = BookingService::new(
            Arc::new(SqlReservationGateway::new(pool.clone())),
            Arc::new(StaticVenueCatalog::new([venue(2)])),
            CapacityAllocator::default(),
        );

        let mut tasks = Vec::new();
        for index in 0..10 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                let request = AllocationRequest {
                    client_id: ClientId(format!("300000{index:02}")),
                    date: day(),
                    start_time: at(21, 0),
                    party_size: 4,
                    note: None,
                };
                service.book(&VenueId("principal".to_string()), &request, Utc::now()).await
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            if let Ok(AllocationDecision::Admitted(_)) = task.await.expect("join") {
                admitted += 1;
            }
        }

        let stored: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM reservation WHERE status = 'confirmed'")
                .fetch_one(&pool)
                .await
                .expect("count");
        assert_eq!(admitted, 2);
        assert_eq!(stored, 2);
    }
}
