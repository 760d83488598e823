use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::client::ClientId;
use crate::domain::venue::VenueId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationCode(pub String);

impl ReservationCode {
    /// Normalizes user-typed codes ("rc-26-0312-0001") and checks the
    /// `RC-<tag>-<MMDD>-<NNNN>` shape.
    pub fn parse(input: &str) -> Option<Self> {
        let candidate = input.trim().to_ascii_uppercase();
        let parts: Vec<&str> = candidate.split('-').collect();
        if parts.len() != 4 {
            return None;
        }
        let (prefix, tag, month_day, ordinal) = (parts[0], parts[1], parts[2], parts[3]);

        let shape_ok = prefix == "RC"
            && (2..=3).contains(&tag.len())
            && is_digits(tag)
            && month_day.len() == 4
            && is_digits(month_day)
            && ordinal.len() == 4
            && is_digits(ordinal);
        if !shape_ok {
            return None;
        }

        let month: u32 = month_day[..2].parse().ok()?;
        let day: u32 = month_day[2..].parse().ok()?;
        // 2024 is a leap year so 02-29 is accepted.
        NaiveDate::from_ymd_opt(2024, month, day)?;

        Some(Self(candidate))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_digits(part: &str) -> bool {
    part.chars().all(|ch| ch.is_ascii_digit())
}

impl std::fmt::Display for ReservationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Half-open occupancy interval `[start, end)`. End may fall on the next day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Slot {
    pub fn starting_at(date: NaiveDate, time: NaiveTime, length: chrono::Duration) -> Self {
        let start = date.and_time(time);
        Self { start, end: start + length }
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn start_time(&self) -> NaiveTime {
        self.start.time()
    }

    pub fn end_time(&self) -> NaiveTime {
        self.end.time()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub code: ReservationCode,
    pub client_id: ClientId,
    pub venue_id: VenueId,
    pub slot: Slot,
    pub party_size: u32,
    pub table_capacity: u32,
    pub status: ReservationStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn date(&self) -> NaiveDate {
        self.slot.date()
    }

    pub fn start_time(&self) -> NaiveTime {
        self.slot.start_time()
    }

    pub fn end_time(&self) -> NaiveTime {
        self.slot.end_time()
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!((self.status, next), (ReservationStatus::Confirmed, ReservationStatus::Cancelled))
    }

    pub fn transition_to(&mut self, next: ReservationStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidReservationTransition { from: self.status, to: next })
    }
}

/// Fields the modify and cancel paths may rewrite on an existing row. The code,
/// owner and venue never change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub slot: Option<Slot>,
    pub party_size: Option<u32>,
    pub table_capacity: Option<u32>,
    pub status: Option<ReservationStatus>,
}

impl ReservationPatch {
    pub fn apply(&self, reservation: &mut Reservation, now: DateTime<Utc>) {
        if let Some(slot) = self.slot {
            reservation.slot = slot;
        }
        if let Some(party_size) = self.party_size {
            reservation.party_size = party_size;
        }
        if let Some(table_capacity) = self.table_capacity {
            reservation.table_capacity = table_capacity;
        }
        if let Some(status) = self.status {
            reservation.status = status;
        }
        reservation.updated_at = now;
    }
}
