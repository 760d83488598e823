use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VenueId(pub String);

impl VenueId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapacityMode {
    #[default]
    Strict,
    Warning,
    Disabled,
}

impl CapacityMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Warning => "warning",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "warning" => Some(Self::Warning),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableClass {
    pub capacity: u32,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueConfig {
    pub id: VenueId,
    pub branch_code: u32,
    pub max_capacity: u32,
    pub slot_minutes: u32,
    pub capacity_mode: CapacityMode,
    pub capacity_overrides: BTreeMap<NaiveDate, u32>,
    pub tables: Vec<TableClass>,
}

impl VenueConfig {
    /// Per-date override wins over the base capacity.
    pub fn effective_capacity(&self, date: NaiveDate) -> u32 {
        self.capacity_overrides.get(&date).copied().unwrap_or(self.max_capacity)
    }

    pub fn slot_duration(&self) -> Result<chrono::Duration, DomainError> {
        if self.slot_minutes == 0 {
            return Err(DomainError::InvariantViolation(format!(
                "venue `{}` has a zero-minute slot duration",
                self.id.0
            )));
        }
        Ok(chrono::Duration::minutes(i64::from(self.slot_minutes)))
    }

    /// Table classes ascending by capacity. A venue without an explicit
    /// inventory behaves as one class sized to the whole venue, which reduces
    /// allocation to a plain people-sum check.
    pub fn inventory(&self) -> Vec<TableClass> {
        if self.tables.is_empty() {
            return vec![TableClass { capacity: self.max_capacity, quantity: self.max_capacity }];
        }

        let mut classes = self.tables.clone();
        classes.sort_by_key(|class| class.capacity);
        classes
    }

    pub fn smallest_fitting_class(&self, party_size: u32) -> Option<TableClass> {
        self.inventory().into_iter().find(|class| class.capacity >= party_size)
    }

    pub fn largest_table(&self) -> u32 {
        self.inventory().iter().map(|class| class.capacity).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;

    use super::{CapacityMode, TableClass, VenueConfig, VenueId};

    fn venue(tables: Vec<TableClass>) -> VenueConfig {
        VenueConfig {
            id: VenueId("centro".to_owned()),
            branch_code: 7,
            max_capacity: 20,
            slot_minutes: 90,
            capacity_mode: CapacityMode::Strict,
            capacity_overrides: BTreeMap::new(),
            tables,
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).expect("valid date")
    }

    #[test]
    fn override_wins_over_base_capacity() {
        let mut venue = venue(Vec::new());
        venue.capacity_overrides.insert(date(14), 8);

        assert_eq!(venue.effective_capacity(date(14)), 8);
        assert_eq!(venue.effective_capacity(date(15)), 20);
    }

    #[test]
    fn smallest_fitting_class_uses_ascending_order() {
        let venue = venue(vec![
            TableClass { capacity: 6, quantity: 1 },
            TableClass { capacity: 2, quantity: 10 },
            TableClass { capacity: 4, quantity: 5 },
        ]);

        assert_eq!(venue.smallest_fitting_class(3).map(|class| class.capacity), Some(4));
        assert_eq!(venue.smallest_fitting_class(2).map(|class| class.capacity), Some(2));
        assert_eq!(venue.smallest_fitting_class(7), None);
        assert_eq!(venue.largest_table(), 6);
    }

    #[test]
    fn empty_inventory_degenerates_to_single_venue_sized_class() {
        let venue = venue(Vec::new());
        assert_eq!(venue.inventory(), vec![TableClass { capacity: 20, quantity: 20 }]);
    }

    #[test]
    fn zero_slot_duration_is_rejected() {
        let mut venue = venue(Vec::new());
        venue.slot_minutes = 0;
        assert!(venue.slot_duration().is_err());
    }

    #[test]
    fn capacity_mode_round_trips_through_text() {
        for mode in [CapacityMode::Strict, CapacityMode::Warning, CapacityMode::Disabled] {
            assert_eq!(CapacityMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(CapacityMode::parse("loose"), None);
    }
}
