//! Multi-threaded reservation tests
//!
//! Validates the insert-or-get logic under racing first writers:
//! - user-key reservations converge on one shard and one row
//! - a lost race is absorbed by the single retry
//! - global-index reservations never collide

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use keyroute_core::{
    FieldKind, Filter, IndexRow, IndexStore, IndexTransaction, RoutingConfig, Shard, ShardId, ShardKey,
    ShardingConfig, SimpleRecord, StoreResult, Value,
};
use keyroute_engine::ShardOrchestrator;
use keyroute_storage::MemoryIndexStore;
use parking_lot::Mutex;

fn config() -> RoutingConfig {
    RoutingConfig::new(vec![Shard::new("s1", 1), Shard::new("s2", 1), Shard::new("s3", 1)])
        .with_object(
            "user",
            ShardingConfig::new("user_key", "user_index").with_sharding_key("user_id"),
        )
        .with_object("order", ShardingConfig::new("global_id", "order_index"))
        .with_object(
            "event",
            ShardingConfig::new("virtual_bucket", "event_buckets").with_bucket_mapper_key("account", FieldKind::Int),
        )
}

fn setup<S: IndexStore + 'static>(store: Arc<S>) -> ShardOrchestrator {
    ShardOrchestrator::new(config(), store).unwrap()
}

fn memory_setup() -> (Arc<MemoryIndexStore>, Arc<ShardOrchestrator>) {
    let store = Arc::new(MemoryIndexStore::new());
    let orchestrator = setup(store.clone());
    store
        .create_tables(orchestrator.index_table_specs().unwrap())
        .unwrap();
    (store, Arc::new(orchestrator))
}

// ============================================================================
// Racing Store
// ============================================================================

/// Store that lets a competing writer commit just before the next
/// transaction begins
struct RacingStore {
    inner: MemoryIndexStore,
    competitor: Mutex<Option<(String, IndexRow)>>,
}

impl RacingStore {
    fn new() -> Self {
        Self {
            inner: MemoryIndexStore::new(),
            competitor: Mutex::new(None),
        }
    }

    fn race_next_begin(&self, table: &str, row: IndexRow) {
        *self.competitor.lock() = Some((table.to_string(), row));
    }
}

impl IndexStore for RacingStore {
    fn begin(&self) -> StoreResult<Box<dyn IndexTransaction + '_>> {
        if let Some((table, row)) = self.competitor.lock().take() {
            let mut txn = self.inner.begin()?;
            txn.insert(&table, row)?;
            txn.commit()?;
        }
        self.inner.begin()
    }

    fn select_one(&self, table: &str, filter: &Filter) -> StoreResult<Option<IndexRow>> {
        self.inner.select_one(table, filter)
    }

    fn select_where(&self, table: &str, filter: &Filter) -> StoreResult<Vec<IndexRow>> {
        self.inner.select_where(table, filter)
    }

    fn select_in(&self, table: &str, column: &str, values: &[Value]) -> StoreResult<Vec<IndexRow>> {
        self.inner.select_in(table, column, values)
    }

    fn update(&self, table: &str, filter: &Filter, changes: &IndexRow) -> StoreResult<u64> {
        self.inner.update(table, filter, changes)
    }

    fn delete(&self, table: &str, filter: &Filter) -> StoreResult<u64> {
        self.inner.delete(table, filter)
    }
}

// ============================================================================
// Lost-Race Tests
// ============================================================================

#[test]
fn test_lost_race_returns_winner_shard() {
    let store = Arc::new(RacingStore::new());
    let orchestrator = setup(store.clone());
    store
        .inner
        .create_tables(orchestrator.index_table_specs().unwrap())
        .unwrap();

    // the competitor commits user 42 on s3 between our select and insert
    store.race_next_begin(
        "user_index",
        IndexRow::new().with("user_id", 42i64).with("shard", "s3"),
    );
    let reservation = orchestrator
        .reserve_index(&SimpleRecord::new("user").with("user_id", 42i64))
        .unwrap();

    assert_eq!(reservation.shard.as_str(), "s3");
    assert_eq!(orchestrator.metrics().retries, 1);
    assert_eq!(store.inner.row_count("user_index").unwrap(), 1);
}

#[test]
fn test_lost_bucket_race_returns_winner_shard() {
    let store = Arc::new(RacingStore::new());
    let orchestrator = setup(store.clone());
    store
        .inner
        .create_tables(orchestrator.index_table_specs().unwrap())
        .unwrap();

    // account 5 lands in bucket 1 with the default range mapper
    store.race_next_begin(
        "event_buckets",
        IndexRow::new().with("bucket", 1i64).with("shard", "s2"),
    );
    let reservation = orchestrator
        .reserve_index(&SimpleRecord::new("event").with("account", 5i64))
        .unwrap();

    assert_eq!(reservation.shard.as_str(), "s2");
    assert_eq!(reservation.bucket.map(|b| b.0), Some(1));
}

// ============================================================================
// Concurrent First Writers
// ============================================================================

#[test]
fn test_concurrent_user_key_reservations_converge() {
    const THREADS: usize = 8;
    let (store, orchestrator) = memory_setup();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                orchestrator
                    .reserve_index(&SimpleRecord::new("user").with("user_id", 42i64))
                    .unwrap()
                    .shard
            })
        })
        .collect();

    let shards: HashSet<ShardId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(shards.len(), 1);
    assert_eq!(store.row_count("user_index").unwrap(), 1);

    let owner = shards.into_iter().next().unwrap();
    assert_eq!(
        orchestrator.find_object_shard("user", &ShardKey::Int(42)).unwrap(),
        Some(owner)
    );
}

#[test]
fn test_concurrent_bucket_reservations_converge() {
    const THREADS: i64 = 6;
    let (store, orchestrator) = memory_setup();
    let barrier = Arc::new(Barrier::new(THREADS as usize));

    // distinct accounts, one bucket
    let handles: Vec<_> = (0..THREADS)
        .map(|account| {
            let orchestrator = Arc::clone(&orchestrator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                orchestrator
                    .reserve_index(&SimpleRecord::new("event").with("account", account))
                    .unwrap()
                    .shard
            })
        })
        .collect();

    let shards: HashSet<ShardId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(shards.len(), 1);
    assert_eq!(store.row_count("event_buckets").unwrap(), 1);
}

#[test]
fn test_concurrent_global_ids_are_unique() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 100;
    let (store, orchestrator) = memory_setup();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|_| {
                        orchestrator
                            .reserve_index(&SimpleRecord::new("order"))
                            .unwrap()
                            .id
                            .unwrap()
                    })
                    .collect::<Vec<i64>>()
            })
        })
        .collect();

    let ids: HashSet<i64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(ids.len(), THREADS * PER_THREAD);
    assert_eq!(store.row_count("order_index").unwrap(), THREADS * PER_THREAD);
    assert_eq!(orchestrator.metrics().retries, 0);
}
