//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's
//! main.rs.

#![allow(dead_code)]

use std::sync::{Arc, Once};

pub use keyroute::{
    FieldKind, MemoryIndexStore, Record, RoutingConfig, Shard, ShardId, ShardKey,
    ShardOrchestrator, ShardingConfig, SimpleRecord, Value,
};

static INIT_TRACING: Once = Once::new();

/// Install a test-writer tracing subscriber once per process
///
/// Set `RUST_LOG` (e.g. `keyroute=debug`) to see routing logs.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Two shards weighted 1:3
pub fn weighted_shards() -> Vec<Shard> {
    vec![Shard::new("s1", 1), Shard::new("s2", 3)]
}

/// One record type per built-in sharding type
///
/// - `user`: user key on `user_id`, with `email` indexed
/// - `session`: user key without index on `token`
/// - `order`: global index
/// - `event`: virtual bucket on `account`
pub fn standard_config() -> RoutingConfig {
    RoutingConfig::new(weighted_shards())
        .with_object(
            "user",
            ShardingConfig::new("user_key", "user_index")
                .with_sharding_key("user_id")
                .with_indexed_field("email", FieldKind::Text),
        )
        .with_object(
            "session",
            ShardingConfig::new("user_key_no_index", "session_index").with_sharding_key("token"),
        )
        .with_object(
            "order",
            ShardingConfig::new("global_id", "order_index")
                .with_indexed_field("customer", FieldKind::Text),
        )
        .with_object(
            "event",
            ShardingConfig::new("virtual_bucket", "event_buckets").with_bucket_mapper_key("account", FieldKind::Int),
        )
}

/// Routing test context: an in-memory store with its tables created
pub struct TestRouter {
    pub store: Arc<MemoryIndexStore>,
    pub router: ShardOrchestrator,
}

impl TestRouter {
    /// Build over [`standard_config`]
    pub fn new() -> Self {
        Self::with_config(standard_config())
    }

    /// Build over `config`, creating every index table
    pub fn with_config(config: RoutingConfig) -> Self {
        init_tracing();
        let store = Arc::new(MemoryIndexStore::new());
        let router = ShardOrchestrator::new(config, store.clone()).expect("valid routing config");
        store
            .create_tables(router.index_table_specs().expect("index table specs"))
            .expect("create index tables");
        Self { store, router }
    }

    /// Committed rows of an index table
    pub fn rows(&self, table: &str) -> usize {
        self.store.row_count(table).expect("table exists")
    }
}

/// A `user` record
pub fn user(user_id: i64) -> SimpleRecord {
    SimpleRecord::new("user")
        .with("user_id", user_id)
        .with("email", format!("user{user_id}@example.com"))
}

/// An `event` record
pub fn event(account: i64) -> SimpleRecord {
    SimpleRecord::new("event").with("account", account)
}
