//! keyroute - key routing and shard assignment for partitioned record types
//!
//! For record types that opt into horizontal partitioning, keyroute decides
//! which shard owns a record, durably reserves identifiers and business keys
//! for new records, and resolves existing keys back to their shard.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use keyroute::{
//!     MemoryIndexStore, RoutingConfig, Shard, ShardKey, ShardOrchestrator, ShardingConfig,
//!     SimpleRecord,
//! };
//!
//! let config = RoutingConfig::new(vec![Shard::new("s1", 1), Shard::new("s2", 3)]).with_object(
//!     "user",
//!     ShardingConfig::new("user_key", "user_index").with_sharding_key("user_id"),
//! );
//! let store = Arc::new(MemoryIndexStore::new());
//! let router = ShardOrchestrator::new(config, store.clone())?;
//! store.create_tables(router.index_table_specs()?)?;
//!
//! let user = SimpleRecord::new("user").with("user_id", 42i64);
//! let reservation = router.reserve_index(&user)?;
//! assert_eq!(
//!     router.find_object_shard("user", &ShardKey::Int(42))?,
//!     Some(reservation.shard)
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! - `keyroute-core`: values, ids, errors, record contract, configuration,
//!   backing-store traits
//! - `keyroute-storage`: in-memory transactional index store
//! - `keyroute-engine`: weight map, bucket mappers, key generators, router,
//!   orchestrator

pub use keyroute_core::{
    BucketId, ConfigError, FieldKind, Filter, GeneratorOptions, IndexFieldSpec, IndexRow,
    IndexStore, IndexTableSpec, IndexTransaction, KeyKind, MapperSpec, Record, Reservation,
    RouteSpec, RoutingConfig, RoutingError, RoutingResult, Shard, ShardId, ShardKey,
    ShardingConfig, ShardingTypeConfig, SimpleRecord, StoreError, StoreResult, Value,
};
pub use keyroute_engine::{
    BucketMapper, FieldRouter, GeneratorDeps, GeneratorRegistry, KeyGenerator, MetricsSnapshot,
    ObjectContext, OrchestratorBuilder, Router, ShardOrchestrator, ShardRegistry, WeightMap,
};
pub use keyroute_storage::{testing, MemoryIndexStore};

/// Generator tags and default column names
pub use keyroute_core::config;
