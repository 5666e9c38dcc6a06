//! Cross-crate routing scenarios
//!
//! Each module drives a `ShardOrchestrator` over the in-memory store the
//! way an application would.

#[path = "../common/mod.rs"]
mod common;

mod config_file;
mod failures;
mod global_index;
mod placement;
mod user_key;
mod virtual_bucket;
