//! Durable sanction records: the store port plus SQLite and in-memory backends.

pub mod memory;
pub mod sqlite;

#[cfg(test)]
mod test_properties;

use crate::core::errors::Result;
use crate::core::model::{CommunityId, Sanction, SanctionKey};

pub use memory::InMemorySanctionStore;
pub use sqlite::SqliteSanctionStore;

/// CRUD over persisted sanctions. At most one record exists per key.
///
/// Every operation is idempotent with respect to absence. Callers serialize
/// operations on the same key; the store only guarantees each call is atomic.
pub trait SanctionStore: Send + Sync {
    /// Insert `record`, replacing any record with the same key.
    fn insert(&self, record: &Sanction) -> Result<()>;

    /// Delete the record for `key`. Returns whether a row was removed.
    fn delete(&self, key: &SanctionKey) -> Result<bool>;

    /// Records with `expires_at <= now`, soonest first.
    fn select_expired(&self, now: i64) -> Result<Vec<Sanction>>;

    /// The record for `key` if it is still in force at `now`.
    fn select_active_for(&self, key: &SanctionKey, now: i64) -> Result<Option<Sanction>>;

    /// The record for `key` regardless of expiry.
    fn fetch(&self, key: &SanctionKey) -> Result<Option<Sanction>>;

    /// All records, optionally for one community, soonest expiry first.
    fn list(&self, community: Option<CommunityId>) -> Result<Vec<Sanction>>;
}
