//! In-memory sanction store for tests and embedders that persist elsewhere.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::core::errors::Result;
use crate::core::model::{CommunityId, Sanction, SanctionKey};
use crate::store::SanctionStore;

/// `BTreeMap`-backed store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemorySanctionStore {
    records: Mutex<BTreeMap<SanctionKey, Sanction>>,
}

impl InMemorySanctionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

fn sorted_by_expiry(mut records: Vec<Sanction>) -> Vec<Sanction> {
    records.sort_by_key(|r| (r.expires_at, r.key()));
    records
}

impl SanctionStore for InMemorySanctionStore {
    fn insert(&self, record: &Sanction) -> Result<()> {
        record.validate()?;
        self.records.lock().insert(record.key(), record.clone());
        Ok(())
    }

    fn delete(&self, key: &SanctionKey) -> Result<bool> {
        Ok(self.records.lock().remove(key).is_some())
    }

    fn select_expired(&self, now: i64) -> Result<Vec<Sanction>> {
        let due = self
            .records
            .lock()
            .values()
            .filter(|r| r.expires_at <= now)
            .cloned()
            .collect();
        Ok(sorted_by_expiry(due))
    }

    fn select_active_for(&self, key: &SanctionKey, now: i64) -> Result<Option<Sanction>> {
        Ok(self
            .records
            .lock()
            .get(key)
            .filter(|r| r.is_active_at(now))
            .cloned())
    }

    fn fetch(&self, key: &SanctionKey) -> Result<Option<Sanction>> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn list(&self, community: Option<CommunityId>) -> Result<Vec<Sanction>> {
        let all = self
            .records
            .lock()
            .values()
            .filter(|r| community.is_none_or(|c| r.community_id == c))
            .cloned()
            .collect();
        Ok(sorted_by_expiry(all))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn insert_replaces_same_key() {
        contract::insert_replaces_same_key(&InMemorySanctionStore::new());
    }

    #[test]
    fn delete_is_idempotent() {
        contract::delete_is_idempotent(&InMemorySanctionStore::new());
    }

    #[test]
    fn expired_selection_is_inclusive_and_ordered() {
        contract::expired_selection_is_inclusive_and_ordered(&InMemorySanctionStore::new());
    }

    #[test]
    fn active_for_excludes_due_records() {
        contract::active_for_excludes_due_records(&InMemorySanctionStore::new());
    }

    #[test]
    fn list_filters_by_community() {
        contract::list_filters_by_community(&InMemorySanctionStore::new());
    }

    #[test]
    fn rejects_records_without_expiry() {
        contract::rejects_records_without_expiry(&InMemorySanctionStore::new());
    }

    #[test]
    fn len_tracks_records() {
        let store = InMemorySanctionStore::new();
        assert!(store.is_empty());
        store.insert(&contract::record(1, 1, 0, 5)).unwrap();
        assert_eq!(store.len(), 1);
    }
}
