use std::sync::Mutex;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc,
};
use thiserror::Error;

use crate::text::fold;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Offset of the venue's local time, used to decide what "today" means.
    fn offset(&self) -> FixedOffset;

    fn local_now(&self) -> NaiveDateTime {
        self.now().with_timezone(&self.offset()).naive_local()
    }

    fn today(&self) -> NaiveDate {
        self.local_now().date()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn with_offset_minutes(minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(minutes * 60).unwrap_or_else(utc_offset);
        Self { offset }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { offset: utc_offset() }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now), offset: utc_offset() }
    }

    pub fn with_offset_minutes(mut self, minutes: i32) -> Self {
        self.offset = FixedOffset::east_opt(minutes * 60).unwrap_or_else(utc_offset);
        self
    }

    pub fn advance(&self, by: Duration) {
        match self.now.lock() {
            Ok(mut now) => *now += by,
            Err(poisoned) => *poisoned.into_inner() += by,
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DateTimeParseError {
    #[error("unrecognized date `{0}`")]
    UnrecognizedDate(String),
    #[error("unrecognized time `{0}`")]
    UnrecognizedTime(String),
}

/// Accepts `hoy`, `mañana`, `pasado mañana`, ISO dates and day-first numeric
/// dates (`12/03`, `12-03-26`, `12.03.2026`). Day/month without a year uses
/// the year of `today`.
pub fn normalize_date(input: &str, today: NaiveDate) -> Result<NaiveDate, DateTimeParseError> {
    let folded = fold(input);
    let unrecognized = || DateTimeParseError::UnrecognizedDate(input.trim().to_owned());

    match folded.as_str() {
        "hoy" => return Ok(today),
        "manana" => return today.succ_opt().ok_or_else(unrecognized),
        "pasado manana" => {
            return today.checked_add_signed(Duration::days(2)).ok_or_else(unrecognized)
        }
        _ => {}
    }

    folded
        .split_whitespace()
        .filter(|token| token.chars().any(|ch| ch.is_ascii_digit()))
        .find_map(|token| parse_numeric_date(token, today.year()))
        .ok_or_else(unrecognized)
}

fn parse_numeric_date(token: &str, current_year: i32) -> Option<NaiveDate> {
    let token = token.trim_end_matches([',', '.', '?', '!']);
    if let Ok(date) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
        return Some(date);
    }

    let parts: Vec<&str> = token.split(['/', '-', '.']).collect();
    if parts.iter().any(|part| part.is_empty() || !part.chars().all(|ch| ch.is_ascii_digit())) {
        return None;
    }

    let day: u32 = parts.first()?.parse().ok()?;
    let month: u32 = parts.get(1)?.parse().ok()?;
    let year = match parts.get(2) {
        None => current_year,
        Some(year) if year.len() == 2 => 2000 + year.parse::<i32>().ok()?,
        Some(year) if year.len() == 4 => year.parse::<i32>().ok()?,
        Some(_) => return None,
    };
    if parts.len() > 3 {
        return None;
    }

    NaiveDate::from_ymd_opt(year, month, day)
}

/// Accepts `20`, `20:30`, `20.30`, `20hs`, `20:30 hs`, `8pm` and `8:30 pm`.
pub fn normalize_time(input: &str) -> Result<NaiveTime, DateTimeParseError> {
    let unrecognized = || DateTimeParseError::UnrecognizedTime(input.trim().to_owned());
    let mut folded: String = fold(input).chars().filter(|ch| !ch.is_whitespace()).collect();

    let mut meridiem = None;
    for (suffix, is_pm) in [("pm", true), ("p.m.", true), ("am", false), ("a.m.", false)] {
        if let Some(stripped) = folded.strip_suffix(suffix) {
            meridiem = Some(is_pm);
            folded = stripped.to_owned();
            break;
        }
    }
    for suffix in ["horas", "hrs", "hs", "h"] {
        if let Some(stripped) = folded.strip_suffix(suffix) {
            folded = stripped.to_owned();
            break;
        }
    }

    let (hour_text, minute_text) = match folded.split_once([':', '.']) {
        Some((hour, minute)) => (hour, minute),
        None => (folded.as_str(), "0"),
    };
    if !is_clock_field(hour_text) || !is_clock_field(minute_text) {
        return Err(unrecognized());
    }

    let mut hour: u32 = hour_text.parse().map_err(|_| unrecognized())?;
    let minute: u32 = minute_text.parse().map_err(|_| unrecognized())?;
    if let Some(is_pm) = meridiem {
        if !(1..=12).contains(&hour) {
            return Err(unrecognized());
        }
        hour = match (is_pm, hour) {
            (true, 12) => 12,
            (true, hour) => hour + 12,
            (false, 12) => 0,
            (false, hour) => hour,
        };
    }

    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(unrecognized)
}

fn is_clock_field(part: &str) -> bool {
    !part.is_empty() && part.len() <= 2 && part.chars().all(|ch| ch.is_ascii_digit())
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn format_iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Day-first rendering used in chat replies.
pub fn display_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}
