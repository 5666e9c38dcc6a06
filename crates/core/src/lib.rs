//! Core types and traits for keyroute
//!
//! This crate defines the foundational types used throughout the system:
//! - Value / ShardKey: column values and routing keys
//! - ShardId / Shard / BucketId: partition identity and placement weight
//! - Reservation: result of assigning a shard to a new record
//! - IndexRow / Filter / IndexTableSpec: index-table rows, predicates, shape
//! - Record: the contract callers implement for their records
//! - Config: validated routing configuration (TOML)
//! - Error: Error type hierarchy
//! - Traits: backing-store abstraction (IndexStore, IndexTransaction)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod record;
pub mod traits;
pub mod types;
pub mod value;

pub use config::{
    FieldKind, GeneratorOptions, IndexFieldSpec, MapperSpec, RouteSpec, RoutingConfig,
    ShardingConfig, ShardingTypeConfig,
};
pub use error::{ConfigError, RoutingError, RoutingResult, StoreError, StoreResult};
pub use record::{Record, SimpleRecord};
pub use traits::{IndexStore, IndexTransaction};
pub use types::{BucketId, Filter, IndexRow, IndexTableSpec, Reservation, Shard, ShardId};
pub use value::{KeyKind, ShardKey, Value};
