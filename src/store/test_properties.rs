//! Property-based tests for store invariants.
//!
//! Arbitrary insert/delete sequences are applied to both backends, which must
//! agree with each other and keep one record per key with ordered queries.

use proptest::prelude::*;

use super::{InMemorySanctionStore, SanctionStore, SqliteSanctionStore};
use crate::core::model::{CommunityId, Sanction, SanctionKey, SubjectId};

#[derive(Debug, Clone)]
enum Op {
    Insert(Sanction),
    Delete(SanctionKey),
}

// ──────────────────── strategies ────────────────────

fn arb_key() -> impl Strategy<Value = SanctionKey> {
    (1u64..4, 1u64..6).prop_map(|(c, s)| SanctionKey::new(CommunityId(c), SubjectId(s)))
}

fn arb_record() -> impl Strategy<Value = Sanction> {
    (arb_key(), 0i64..1_000, 1i64..1_000, "[a-z]{0,12}").prop_map(
        |(key, imposed_at, len, reason)| Sanction {
            community_id: key.community_id,
            subject_id: key.subject_id,
            imposed_at,
            expires_at: imposed_at + len,
            reason,
        },
    )
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => arb_record().prop_map(Op::Insert),
        1 => arb_key().prop_map(Op::Delete),
    ]
}

fn apply(store: &dyn SanctionStore, op: &Op) {
    match op {
        Op::Insert(record) => store.insert(record).unwrap(),
        Op::Delete(key) => {
            store.delete(key).unwrap();
        }
    }
}

// ──────────────────── property tests ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Both backends end up with identical, key-unique contents.
    #[test]
    fn backends_agree_and_keys_stay_unique(
        ops in prop::collection::vec(arb_op(), 1..40)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = SqliteSanctionStore::open(&dir.path().join("p.sqlite3")).unwrap();
        let memory = InMemorySanctionStore::new();
        for op in &ops {
            apply(&sqlite, op);
            apply(&memory, op);
        }

        let from_sqlite = sqlite.list(None).unwrap();
        let from_memory = memory.list(None).unwrap();
        prop_assert_eq!(&from_sqlite, &from_memory);

        let mut keys: Vec<SanctionKey> = from_memory.iter().map(Sanction::key).collect();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        prop_assert_eq!(keys.len(), total);
    }

    /// Expired selection is exactly the due records, ordered by expiry.
    #[test]
    fn expired_selection_partitions_by_now(
        ops in prop::collection::vec(arb_op(), 1..40),
        now in 0i64..2_000,
    ) {
        let store = InMemorySanctionStore::new();
        for op in &ops {
            apply(&store, op);
        }

        let expired = store.select_expired(now).unwrap();
        prop_assert!(expired.iter().all(|r| r.expires_at <= now));
        prop_assert!(expired.windows(2).all(|w| w[0].expires_at <= w[1].expires_at));

        for record in store.list(None).unwrap() {
            let active = store.select_active_for(&record.key(), now).unwrap();
            prop_assert_eq!(active.is_some(), record.expires_at > now);
            prop_assert_eq!(expired.contains(&record), record.expires_at <= now);
        }
    }
}
