use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::booking::gateway::{CountScope, GatewayError, ReservationUnitOfWork};
use crate::domain::reservation::ReservationCode;
use crate::domain::venue::VenueConfig;

pub const MAX_ORDINAL: u32 = 9_999;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CodeScope {
    #[default]
    VenueDay,
    Venue,
    Global,
}

impl CodeScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VenueDay => "venue_day",
            Self::Venue => "venue",
            Self::Global => "global",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "venue_day" => Some(Self::VenueDay),
            "venue" => Some(Self::Venue),
            "global" => Some(Self::Global),
            _ => None,
        }
    }
}

/// Second segment of the code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScopeTag {
    #[default]
    Year,
    Branch,
}

impl ScopeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Branch => "branch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "year" => Some(Self::Year),
            "branch" => Some(Self::Branch),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodeGenerationError {
    #[error("no free reservation ordinal left for {scope} on {date}")]
    OrdinalOverflow { scope: &'static str, date: NaiveDate },
    #[error("could not count confirmed reservations: {0}")]
    Count(GatewayError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CodeGenerator {
    pub scope: CodeScope,
    pub tag: ScopeTag,
}

impl CodeGenerator {
    pub fn new(scope: CodeScope, tag: ScopeTag) -> Self {
        Self { scope, tag }
    }

    pub fn count_scope(&self, venue: &VenueConfig, date: NaiveDate) -> CountScope {
        match self.scope {
            CodeScope::VenueDay => CountScope::VenueDay { venue: venue.id.clone(), date },
            CodeScope::Venue => CountScope::Venue { venue: venue.id.clone() },
            CodeScope::Global => CountScope::Global,
        }
    }

    pub fn format(
        &self,
        venue: &VenueConfig,
        date: NaiveDate,
        ordinal: u32,
    ) -> Result<ReservationCode, CodeGenerationError> {
        if ordinal == 0 || ordinal > MAX_ORDINAL {
            return Err(CodeGenerationError::OrdinalOverflow { scope: self.scope.as_str(), date });
        }

        let tag = match self.tag {
            ScopeTag::Year => date.format("%y").to_string(),
            ScopeTag::Branch => format!("{:03}", venue.branch_code),
        };
        Ok(ReservationCode(format!("RC-{tag}-{}-{ordinal:04}", date.format("%m%d"))))
    }

    /// Next unused code for the scope. Starts at `confirmed + 1` and probes
    /// upward past codes still held by cancelled rows.
    pub async fn generate(
        &self,
        uow: &mut dyn ReservationUnitOfWork,
        venue: &VenueConfig,
        date: NaiveDate,
    ) -> Result<ReservationCode, CodeGenerationError> {
        let scope = self.count_scope(venue, date);
        let confirmed = uow.count_confirmed(&scope).await.map_err(CodeGenerationError::Count)?;
        let uniqueness_venue = match self.scope {
            CodeScope::Global => None,
            CodeScope::VenueDay | CodeScope::Venue => Some(&venue.id),
        };

        let mut ordinal = confirmed.saturating_add(1);
        loop {
            let code = self.format(venue, date, ordinal)?;
            let taken = uow
                .code_exists(uniqueness_venue, &code)
                .await
                .map_err(CodeGenerationError::Count)?;
            if !taken {
                return Ok(code);
            }
            ordinal += 1;
        }
    }
}
