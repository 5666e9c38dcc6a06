//! MemoryIndexStore: in-memory transactional index-table store
//!
//! This module implements the IndexStore trait using:
//! - `DashMap<String, Arc<TableHandle>>` for lock-free table lookup
//! - `parking_lot::RwLock<Table>` per table for row access
//! - `AtomicI64` per table for auto-increment ids
//!
//! # Transactions
//!
//! Transactions buffer their inserts and apply them at commit. Uniqueness
//! is checked twice:
//! 1. at insert time, against committed rows and the transaction's own
//!    buffered rows, so a losing writer usually fails early
//! 2. at commit time, under the table write locks, so that of two
//!    transactions inserting the same unique value only the first
//!    committer wins
//!
//! A transaction dropped without commit or rollback is rolled back.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use keyroute_core::{
    Filter, IndexRow, IndexStore, IndexTableSpec, IndexTransaction, StoreError, StoreResult,
    Value,
};
use tracing::debug;

use crate::table::TableHandle;
use crate::testing::{FaultPlan, FaultPoint};

/// In-memory index-table store
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    tables: DashMap<String, Arc<TableHandle>>,
    faults: FaultPlan,
    next_txn_id: AtomicU64,
}

impl MemoryIndexStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table
    ///
    /// # Errors
    ///
    /// Returns `StoreError::TableExists` if the name is taken.
    pub fn create_table(&self, spec: IndexTableSpec) -> StoreResult<()> {
        use dashmap::mapref::entry::Entry;
        match self.tables.entry(spec.table.clone()) {
            Entry::Occupied(_) => Err(StoreError::TableExists(spec.table)),
            Entry::Vacant(slot) => {
                debug!(target: "keyroute::store", table = %spec.table, "Table created");
                slot.insert(Arc::new(TableHandle::new(spec)));
                Ok(())
            }
        }
    }

    /// Create every table in `specs`
    ///
    /// # Errors
    ///
    /// Returns the first creation error; tables created before it remain.
    pub fn create_tables(&self, specs: impl IntoIterator<Item = IndexTableSpec>) -> StoreResult<()> {
        specs.into_iter().try_for_each(|spec| self.create_table(spec))
    }

    /// Drop a table and its rows; returns whether it existed
    pub fn drop_table(&self, table: &str) -> bool {
        self.tables.remove(table).is_some()
    }

    /// Names of all tables, sorted
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Shape of a table
    ///
    /// # Errors
    ///
    /// Returns `StoreError::TableNotFound` for unknown tables.
    pub fn table_spec(&self, table: &str) -> StoreResult<IndexTableSpec> {
        Ok(self.handle(table)?.table().read().spec().clone())
    }

    /// Number of committed rows in a table
    ///
    /// # Errors
    ///
    /// Returns `StoreError::TableNotFound` for unknown tables.
    pub fn row_count(&self, table: &str) -> StoreResult<usize> {
        Ok(self.handle(table)?.table().read().len())
    }

    /// Every committed row of a table
    ///
    /// # Errors
    ///
    /// Returns `StoreError::TableNotFound` for unknown tables.
    pub fn rows(&self, table: &str) -> StoreResult<Vec<IndexRow>> {
        Ok(self.handle(table)?.table().read().rows().cloned().collect())
    }

    /// Fault plan consulted by every operation
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    fn handle(&self, table: &str) -> StoreResult<Arc<TableHandle>> {
        self.tables
            .get(table)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }
}

impl IndexStore for MemoryIndexStore {
    fn begin(&self) -> StoreResult<Box<dyn IndexTransaction + '_>> {
        self.faults.check(FaultPoint::Begin)?;
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(target: "keyroute::store", txn = id, "Transaction started");
        Ok(Box::new(MemoryTransaction {
            store: self,
            id,
            pending: Vec::new(),
        }))
    }

    fn select_one(&self, table: &str, filter: &Filter) -> StoreResult<Option<IndexRow>> {
        self.faults.check(FaultPoint::Select)?;
        let handle = self.handle(table)?;
        let guard = handle.table().read();
        Ok(guard.find(filter).first().map(|row| (*row).clone()))
    }

    fn select_where(&self, table: &str, filter: &Filter) -> StoreResult<Vec<IndexRow>> {
        self.faults.check(FaultPoint::Select)?;
        let handle = self.handle(table)?;
        let guard = handle.table().read();
        Ok(guard.find(filter).into_iter().cloned().collect())
    }

    fn select_in(&self, table: &str, column: &str, values: &[Value]) -> StoreResult<Vec<IndexRow>> {
        self.faults.check(FaultPoint::Select)?;
        let handle = self.handle(table)?;
        let guard = handle.table().read();
        Ok(guard.find_in(column, values).into_iter().cloned().collect())
    }

    fn update(&self, table: &str, filter: &Filter, changes: &IndexRow) -> StoreResult<u64> {
        self.faults.check(FaultPoint::Update)?;
        let handle = self.handle(table)?;
        let mut guard = handle.table().write();
        guard.update(filter, changes)
    }

    fn delete(&self, table: &str, filter: &Filter) -> StoreResult<u64> {
        self.faults.check(FaultPoint::Delete)?;
        let handle = self.handle(table)?;
        let mut guard = handle.table().write();
        Ok(guard.delete(filter))
    }
}

/// Open transaction of a [`MemoryIndexStore`]
pub struct MemoryTransaction<'a> {
    store: &'a MemoryIndexStore,
    id: u64,
    /// Buffered inserts, in order: (table, row)
    pending: Vec<(String, IndexRow)>,
}

impl MemoryTransaction<'_> {
    /// Transaction id (diagnostics only)
    pub fn id(&self) -> u64 {
        self.id
    }

    fn pending_conflict(&self, handle: &TableHandle, table: &str, row: &IndexRow) -> Option<String> {
        let spec = handle.table().read().spec().clone();
        let conflict = spec.unique_columns().find_map(|column| {
            let value = row.get(column).filter(|v| !v.is_null())?;
            self.pending
                .iter()
                .filter(|(t, _)| t == table)
                .any(|(_, other)| other.get(column) == Some(value))
                .then(|| column.to_string())
        });
        conflict
    }
}

impl IndexTransaction for MemoryTransaction<'_> {
    fn insert(&mut self, table: &str, mut row: IndexRow) -> StoreResult<Option<i64>> {
        self.store.faults.check(FaultPoint::Insert)?;
        let handle = self.store.handle(table)?;

        let (primary_key, auto_increment) = {
            let guard = handle.table().read();
            (guard.spec().primary_key.clone(), guard.spec().auto_increment)
        };
        let generated = if auto_increment && !row.has(&primary_key) {
            let id = handle.next_auto_id();
            row.set(primary_key.as_str(), id);
            Some(id)
        } else {
            if let Some(id) = row.get(&primary_key).and_then(Value::as_int) {
                handle.observe_id(id);
            }
            None
        };

        handle.table().read().check_insert(&row)?;
        if let Some(column) = self.pending_conflict(&handle, table, &row) {
            return Err(StoreError::UniqueViolation {
                table: table.to_string(),
                column,
            });
        }

        self.pending.push((table.to_string(), row));
        Ok(generated)
    }

    fn select_one(&mut self, table: &str, filter: &Filter) -> StoreResult<Option<IndexRow>> {
        let own = self
            .pending
            .iter()
            .rev()
            .find(|(t, row)| t == table && filter.matches(row))
            .map(|(_, row)| row.clone());
        if own.is_some() {
            return Ok(own);
        }
        self.store.select_one(table, filter)
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let pending = std::mem::take(&mut self.pending);
        self.store.faults.check(FaultPoint::Commit)?;

        let mut by_table: BTreeMap<String, Vec<IndexRow>> = BTreeMap::new();
        for (table, row) in pending {
            by_table.entry(table).or_default().push(row);
        }

        // lock in name order so concurrent commits cannot deadlock
        let handles = by_table
            .keys()
            .map(|table| self.store.handle(table))
            .collect::<StoreResult<Vec<_>>>()?;
        let mut guards: Vec<_> = handles.iter().map(|h| h.table().write()).collect();

        for (guard, rows) in guards.iter().zip(by_table.values()) {
            for row in rows {
                guard.check_insert(row)?;
            }
        }
        let mut applied = 0usize;
        for (guard, rows) in guards.iter_mut().zip(by_table.into_values()) {
            for row in rows {
                guard.insert(row)?;
                applied += 1;
            }
        }

        debug!(target: "keyroute::store", txn = self.id, rows = applied, "Transaction committed");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        let discarded = std::mem::take(&mut self.pending).len();
        debug!(target: "keyroute::store", txn = self.id, rows = discarded, "Transaction rolled back");
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                target: "keyroute::store",
                txn = self.id,
                rows = self.pending.len(),
                "Transaction dropped without commit, rolling back"
            );
        }
    }
}
