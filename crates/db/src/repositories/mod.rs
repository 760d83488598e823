use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use turnero_core::booking::GatewayError;
use turnero_core::sessions::SessionStoreError;

pub mod client;
pub mod reservation;
pub mod session;

pub use client::SqlClientDirectory;
pub use reservation::{SqlReservationGateway, SqlUnitOfWork};
pub use session::SqlSessionStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(error)) => error.is_unique_violation(),
            _ => false,
        }
    }
}

impl From<RepositoryError> for GatewayError {
    fn from(value: RepositoryError) -> Self {
        if value.is_unique_violation() {
            GatewayError::Conflict(value.to_string())
        } else {
            GatewayError::Storage(value.to_string())
        }
    }
}

impl From<RepositoryError> for SessionStoreError {
    fn from(value: RepositoryError) -> Self {
        SessionStoreError::Storage(value.to_string())
    }
}

pub(crate) const SLOT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|error| RepositoryError::Decode(error.to_string()))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("timestamp `{raw}`: {error}")))
}

pub(crate) fn parse_slot_bound(raw: &str) -> Result<NaiveDateTime, RepositoryError> {
    NaiveDateTime::parse_from_str(raw, SLOT_FORMAT)
        .map_err(|error| RepositoryError::Decode(format!("slot bound `{raw}`: {error}")))
}

pub(crate) fn format_slot_bound(value: NaiveDateTime) -> String {
    value.format(SLOT_FORMAT).to_string()
}

pub(crate) fn format_date(value: NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub(crate) fn to_u32(value: i64, field: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{field} out of range: {value}")))
}
