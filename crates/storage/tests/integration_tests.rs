//! Integration tests for the in-memory index store
//!
//! These tests verify that MemoryIndexStore behaves as a complete system:
//! - Transaction visibility and rollback
//! - Unique constraints under concurrent first writers
//! - Index consistency under random operation sequences
//! - Fault injection

use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;

use keyroute_core::{Filter, IndexRow, IndexStore, IndexTableSpec, StoreError, Value};
use keyroute_storage::testing::FaultPoint;
use keyroute_storage::MemoryIndexStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ============================================================================
// Helper Functions
// ============================================================================

fn user_store() -> MemoryIndexStore {
    let store = MemoryIndexStore::new();
    store
        .create_table(
            IndexTableSpec::new("user_index", "id")
                .auto_increment()
                .unique("user_id"),
        )
        .unwrap();
    store
}

fn user(user_id: i64, shard: &str) -> IndexRow {
    IndexRow::new().with("user_id", user_id).with("shard", shard)
}

// ============================================================================
// Transaction Tests
// ============================================================================

mod transactions {
    use super::*;

    #[test]
    fn test_multi_table_commit_is_atomic() {
        let store = user_store();
        store
            .create_table(IndexTableSpec::new("bucket_index", "bucket"))
            .unwrap();

        let mut seed = store.begin().unwrap();
        seed.insert("bucket_index", IndexRow::new().with("bucket", 3i64).with("shard", "s1"))
            .unwrap();
        seed.commit().unwrap();

        let mut racer = store.begin().unwrap();
        let mut txn = store.begin().unwrap();
        txn.insert("user_index", user(1, "s1")).unwrap();
        txn.insert("bucket_index", IndexRow::new().with("bucket", 4i64).with("shard", "s2"))
            .unwrap();
        racer
            .insert("bucket_index", IndexRow::new().with("bucket", 4i64).with("shard", "s1"))
            .unwrap();
        racer.commit().unwrap();

        // the bucket row lost the race; the user row must not appear either
        assert!(matches!(txn.commit(), Err(StoreError::UniqueViolation { .. })));
        assert_eq!(store.row_count("user_index").unwrap(), 0);
        assert_eq!(store.row_count("bucket_index").unwrap(), 2);
    }

    #[test]
    fn test_generated_ids_are_visible_inside_transaction() {
        let store = user_store();
        let mut txn = store.begin().unwrap();
        let id = txn.insert("user_index", user(7, "s2")).unwrap().unwrap();
        let row = txn
            .select_one("user_index", &Filter::eq("id", id))
            .unwrap()
            .unwrap();
        assert_eq!(row.get("user_id"), Some(&Value::Int(7)));
        txn.commit().unwrap();
    }

    #[test]
    fn test_fault_on_begin() {
        let store = user_store();
        store.faults().fail_next(FaultPoint::Begin, 1);
        assert!(matches!(store.begin(), Err(StoreError::Injected(_))));
        assert!(store.begin().is_ok());
    }

    #[test]
    fn test_fault_on_reads_and_writes() {
        let store = user_store();
        let filter = Filter::eq("user_id", 1i64);
        for point in [FaultPoint::Select, FaultPoint::Update, FaultPoint::Delete] {
            store.faults().fail_next(point, 1);
        }
        assert!(store.select_one("user_index", &filter).is_err());
        assert!(store.update("user_index", &filter, &user(1, "s1")).is_err());
        assert!(store.delete("user_index", &filter).is_err());
        assert_eq!(store.faults().fired(), 3);
        assert!(store.select_one("user_index", &filter).unwrap().is_none());
    }
}

// ============================================================================
// Concurrency Tests
// ============================================================================

mod concurrency {
    use super::*;

    #[test]
    fn test_concurrent_first_writers_one_wins() {
        const WRITERS: usize = 8;
        let store = Arc::new(user_store());
        let barrier = Arc::new(Barrier::new(WRITERS));

        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let shard = format!("s{}", i);
                    barrier.wait();
                    let mut txn = store.begin().unwrap();
                    match txn.insert("user_index", user(42, &shard)) {
                        Ok(_) => txn.commit().is_ok(),
                        Err(StoreError::UniqueViolation { .. }) => false,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.row_count("user_index").unwrap(), 1);
    }

    #[test]
    fn test_concurrent_distinct_keys_all_commit() {
        const THREADS: i64 = 4;
        const PER_THREAD: i64 = 250;
        let store = Arc::new(user_store());

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let mut txn = store.begin().unwrap();
                        txn.insert("user_index", user(t * PER_THREAD + i, "s1")).unwrap();
                        txn.commit().unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let rows = store.rows("user_index").unwrap();
        assert_eq!(rows.len(), (THREADS * PER_THREAD) as usize);
        let mut ids: Vec<i64> = rows.iter().filter_map(|r| r.get("id")?.as_int()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), rows.len());
    }
}

// ============================================================================
// Consistency Tests
// ============================================================================

mod consistency {
    use super::*;

    /// Random insert/update/delete sequence checked against a HashMap model
    #[test]
    fn test_random_operations_match_model() {
        let store = user_store();
        let mut model: HashMap<i64, String> = HashMap::new();
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..2_000 {
            let key = rng.gen_range(0..64i64);
            let shard = format!("s{}", rng.gen_range(1..4));
            let filter = Filter::eq("user_id", key);
            match rng.gen_range(0..3) {
                0 => {
                    let mut txn = store.begin().unwrap();
                    let result = txn.insert("user_index", user(key, &shard));
                    if model.contains_key(&key) {
                        assert!(matches!(result, Err(StoreError::UniqueViolation { .. })));
                        txn.rollback().unwrap();
                    } else {
                        result.unwrap();
                        txn.commit().unwrap();
                        model.insert(key, shard);
                    }
                }
                1 => {
                    let changed = store
                        .update("user_index", &filter, &IndexRow::new().with("shard", shard.as_str()))
                        .unwrap();
                    assert_eq!(changed, u64::from(model.contains_key(&key)));
                    if let Some(current) = model.get_mut(&key) {
                        *current = shard;
                    }
                }
                _ => {
                    let removed = store.delete("user_index", &filter).unwrap();
                    assert_eq!(removed, u64::from(model.remove(&key).is_some()));
                }
            }
        }

        assert_eq!(store.row_count("user_index").unwrap(), model.len());
        let keys: Vec<Value> = model.keys().map(|k| Value::Int(*k)).collect();
        let rows = store.select_in("user_index", "user_id", &keys).unwrap();
        assert_eq!(rows.len(), model.len());
        for row in rows {
            let key = row.get("user_id").and_then(Value::as_int).unwrap();
            assert_eq!(row.get("shard").and_then(Value::as_str), model.get(&key).map(String::as_str));
        }
    }
}
