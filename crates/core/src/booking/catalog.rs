use std::collections::BTreeMap;

use crate::booking::gateway::VenueCatalog;
use crate::domain::venue::{VenueConfig, VenueId};

/// Venue configuration loaded once at startup from `[[venues]]`.
#[derive(Clone, Debug, Default)]
pub struct StaticVenueCatalog {
    venues: BTreeMap<VenueId, VenueConfig>,
}

impl StaticVenueCatalog {
    pub fn new(venues: impl IntoIterator<Item = VenueConfig>) -> Self {
        Self { venues: venues.into_iter().map(|venue| (venue.id.clone(), venue)).collect() }
    }
}

impl VenueCatalog for StaticVenueCatalog {
    fn venue(&self, id: &VenueId) -> Option<VenueConfig> {
        self.venues.get(id).cloned()
    }
}
