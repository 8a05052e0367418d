// Shared fixtures for unit tests

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};

use crate::db::{StoreError, Venue, VenueStore};
use crate::merge::MergedPayload;

/// Venue with a name, optional street address, and city; everything else empty
pub fn test_venue(id: &str, name: &str, address: Option<&str>, city: &str) -> Venue {
    let mut venue = Venue::new(id, name, city, "US", &format!("{}-slug", id));
    venue.address = address.map(str::to_string);
    venue
}

/// In-memory store with injectable failures
#[derive(Default)]
pub struct MemoryStore {
    pub venues: RefCell<BTreeMap<String, Venue>>,
    pub order: RefCell<Vec<String>>,
    pub fail_updates: HashSet<String>,
    pub fail_deletes: HashSet<String>,
    pub fail_reads: bool,
}

impl MemoryStore {
    pub fn with_venues(venues: Vec<Venue>) -> Self {
        let store = MemoryStore::default();
        for venue in venues {
            store.order.borrow_mut().push(venue.id.clone());
            store.venues.borrow_mut().insert(venue.id.clone(), venue);
        }
        store
    }

    pub fn get(&self, id: &str) -> Option<Venue> {
        self.venues.borrow().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.venues.borrow().len()
    }
}

impl VenueStore for MemoryStore {
    fn fetch_all(&self) -> Result<Vec<Venue>, StoreError> {
        if self.fail_reads {
            return Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        let venues = self.venues.borrow();
        Ok(self
            .order
            .borrow()
            .iter()
            .filter_map(|id| venues.get(id).cloned())
            .collect())
    }

    fn update_fields(&self, id: &str, payload: &MergedPayload) -> Result<(), StoreError> {
        if self.fail_updates.contains(id) {
            return Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        let mut venues = self.venues.borrow_mut();
        let venue = venues
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        payload.apply_to(venue);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        if self.fail_deletes.contains(id) {
            return Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        self.venues
            .borrow_mut()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
