//! Routing engine for keyroute
//!
//! This crate orchestrates the routing layers:
//! - WeightMap: cumulative-weight table for weighted random placement
//! - ShardRegistry: configured shards and their weights
//! - Bucket mappers: key -> virtual bucket (range, modulo, hash)
//! - Key generators: global index, user key, virtual bucket
//! - Router: explicit placement rules
//! - ShardOrchestrator: the public routing API
//!
//! The engine never opens store connections; an `IndexStore` is injected
//! when the orchestrator is built.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod generator;
pub mod mapper;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod weight;

pub use generator::{
    GeneratorDeps, GeneratorFactory, GeneratorRegistry, GlobalIndexGenerator, KeyGenerator,
    ObjectContext, UserKeyGenerator, VirtualBucketGenerator,
};
pub use mapper::{BucketMapper, HashMapper, MapperSet, ModuloMapper, RangeMapper};
pub use metrics::{MetricsSnapshot, RoutingMetrics};
pub use orchestrator::{OrchestratorBuilder, ShardOrchestrator};
pub use registry::ShardRegistry;
pub use router::{FieldRouter, Router};
pub use weight::WeightMap;
