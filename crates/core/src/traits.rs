//! Core traits for index-table storage
//!
//! This module defines the IndexStore and IndexTransaction traits that let
//! the routing engine run against any relational backend without knowing
//! how connections are opened. The engine only ever receives an already
//! constructed store.

use crate::error::StoreResult;
use crate::types::{Filter, IndexRow};
use crate::value::Value;

/// Storage abstraction for per-record-type index tables
///
/// Every method addresses one table by name. Non-transactional methods are
/// single statements and are atomic on their own.
///
/// Thread safety: All methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
pub trait IndexStore: Send + Sync {
    /// Open a transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a transaction.
    fn begin(&self) -> StoreResult<Box<dyn IndexTransaction + '_>>;

    /// Fetch the first committed row matching `filter`
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the read fails.
    fn select_one(&self, table: &str, filter: &Filter) -> StoreResult<Option<IndexRow>>;

    /// Fetch every committed row matching `filter`
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the read fails.
    fn select_where(&self, table: &str, filter: &Filter) -> StoreResult<Vec<IndexRow>>;

    /// Fetch every committed row whose `column` is one of `values`
    ///
    /// One round trip regardless of how many values are passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the read fails.
    fn select_in(&self, table: &str, column: &str, values: &[Value]) -> StoreResult<Vec<IndexRow>>;

    /// Apply `changes` to every row matching `filter`
    ///
    /// Returns the number of rows updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the update would break a unique constraint or
    /// the write fails.
    fn update(&self, table: &str, filter: &Filter, changes: &IndexRow) -> StoreResult<u64>;

    /// Delete every row matching `filter`
    ///
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete(&self, table: &str, filter: &Filter) -> StoreResult<u64>;
}

/// An open transaction against an [`IndexStore`]
///
/// Writes are invisible to other readers until [`commit`](Self::commit).
/// Dropping a transaction without committing rolls it back.
pub trait IndexTransaction {
    /// Insert a row
    ///
    /// Returns the generated primary key when the table auto-increments.
    ///
    /// # Errors
    ///
    /// Returns an error if the row breaks a unique constraint, lacks its
    /// primary key, or the write fails.
    fn insert(&mut self, table: &str, row: IndexRow) -> StoreResult<Option<i64>>;

    /// Fetch the first row matching `filter`, including this
    /// transaction's own uncommitted inserts
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the read fails.
    fn select_one(&mut self, table: &str, filter: &Filter) -> StoreResult<Option<IndexRow>>;

    /// Make all writes visible atomically
    ///
    /// # Errors
    ///
    /// Returns an error if a concurrent commit won a unique constraint race
    /// or the write fails; nothing is applied in that case.
    fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard all writes
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to roll back.
    fn rollback(self: Box<Self>) -> StoreResult<()>;
}
