//! Per-key mutual exclusion for lifecycle operations.

use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};

use crate::core::model::SanctionKey;

#[derive(Debug, Default)]
struct Slot {
    held: bool,
    waiters: usize,
}

/// Serializes apply, lift, expire and reapply for the same key.
///
/// Different keys never contend beyond the short map lookup. Slots are
/// removed when the last holder or waiter leaves, so the map only holds keys
/// with work in flight.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<SanctionKey, Slot>>,
    released: Condvar,
}

/// Holds the lock for one key until dropped.
#[must_use = "the key is unlocked as soon as the guard is dropped"]
#[derive(Debug)]
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: SanctionKey,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then hold it.
    pub fn lock(&self, key: SanctionKey) -> KeyGuard<'_> {
        let mut slots = self.slots.lock();
        loop {
            let slot = slots.entry(key).or_default();
            if !slot.held {
                slot.held = true;
                break;
            }
            slot.waiters += 1;
            self.released.wait(&mut slots);
            if let Some(slot) = slots.get_mut(&key) {
                slot.waiters -= 1;
            }
        }
        KeyGuard { owner: self, key }
    }

    /// Number of keys currently locked or awaited.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }

    fn release(&self, key: SanctionKey) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&key) {
            slot.held = false;
            if slot.waiters == 0 {
                slots.remove(&key);
            }
        }
        drop(slots);
        self.released.notify_all();
    }
}

impl KeyGuard<'_> {
    /// The key this guard holds.
    #[must_use]
    pub const fn key(&self) -> SanctionKey {
        self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.owner.release(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{CommunityId, SubjectId};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn key(s: u64) -> SanctionKey {
        SanctionKey::new(CommunityId(1), SubjectId(s))
    }

    #[test]
    fn slots_are_pruned_after_release() {
        let locks = KeyedLocks::new();
        {
            let guard = locks.lock(key(1));
            assert_eq!(guard.key(), key(1));
            assert_eq!(locks.in_flight(), 1);
        }
        assert_eq!(locks.in_flight(), 0);
    }

    #[test]
    fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(key(1));
        let _b = locks.lock(key(2));
        assert_eq!(locks.in_flight(), 2);
    }

    #[test]
    fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _guard = locks.lock(key(7));
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(50));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.in_flight(), 0);
    }
}
