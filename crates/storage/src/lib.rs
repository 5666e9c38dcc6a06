//! Storage layer for keyroute
//!
//! This crate implements the in-memory index-table backend with:
//! - MemoryIndexStore: DashMap of tables, one RwLock per table
//! - Table: BTreeMap rows plus unique-column indices
//! - Auto-increment primary keys with AtomicI64
//! - Buffered transactions with commit-time uniqueness validation
//! - Fault injection for testing failure paths
//!
//! # Concurrency
//!
//! - Lock-free table lookup via DashMap
//! - Per-table locking (no cross-table contention outside commit)
//! - FxHashMap for O(1) unique-value lookups

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod index;
pub mod memory;
pub mod table;
pub mod testing;

pub use index::UniqueIndex;
pub use memory::{MemoryIndexStore, MemoryTransaction};
pub use table::{Table, TableHandle};
