//! In-memory index table
//!
//! A table is a `BTreeMap<row id, IndexRow>` plus a [`UniqueIndex`] over
//! its primary key and unique columns. Row ids are internal and never
//! leave this module; the auto-increment primary key is allocated by
//! [`TableHandle`] so that uncommitted transactions can hand out ids
//! without holding the table lock.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use keyroute_core::{Filter, IndexRow, IndexTableSpec, StoreError, StoreResult, Value};
use parking_lot::RwLock;

use crate::index::UniqueIndex;

/// Committed rows of one index table
#[derive(Debug)]
pub struct Table {
    spec: IndexTableSpec,
    rows: BTreeMap<u64, IndexRow>,
    unique: UniqueIndex,
    next_row_id: u64,
}

impl Table {
    /// Create an empty table
    pub fn new(spec: IndexTableSpec) -> Self {
        let unique = UniqueIndex::new(spec.unique_columns());
        Self {
            spec,
            rows: BTreeMap::new(),
            unique,
            next_row_id: 1,
        }
    }

    /// Table shape
    pub fn spec(&self) -> &IndexTableSpec {
        &self.spec
    }

    /// Number of committed rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table holds no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Verify that `row` could be inserted now
    pub fn check_insert(&self, row: &IndexRow) -> StoreResult<()> {
        if !row.has(&self.spec.primary_key) {
            return Err(StoreError::InvalidRow {
                table: self.spec.table.clone(),
                reason: format!("missing primary key '{}'", self.spec.primary_key),
            });
        }
        match self.unique.conflict(row, None) {
            Some(column) => Err(self.violation(column)),
            None => Ok(()),
        }
    }

    /// Insert a row after checking constraints
    pub fn insert(&mut self, row: IndexRow) -> StoreResult<()> {
        self.check_insert(&row)?;
        let row_id = self.next_row_id;
        self.next_row_id += 1;
        self.unique.insert(row_id, &row);
        self.rows.insert(row_id, row);
        Ok(())
    }

    /// Committed rows matching `filter`, in insertion order
    pub fn find(&self, filter: &Filter) -> Vec<&IndexRow> {
        // an equality on a unique column resolves to at most one row
        let indexed = filter
            .conditions()
            .iter()
            .find(|(column, value)| !value.is_null() && self.unique.covers(column));
        if let Some((column, value)) = indexed {
            return self
                .unique
                .lookup(column, value)
                .and_then(|id| self.rows.get(&id))
                .filter(|row| filter.matches(row))
                .into_iter()
                .collect();
        }
        self.rows.values().filter(|row| filter.matches(row)).collect()
    }

    /// Committed rows whose `column` is one of `values`
    pub fn find_in(&self, column: &str, values: &[Value]) -> Vec<&IndexRow> {
        if self.unique.covers(column) {
            let mut ids: Vec<u64> = values
                .iter()
                .filter_map(|v| self.unique.lookup(column, v))
                .collect();
            ids.sort_unstable();
            ids.dedup();
            return ids.iter().filter_map(|id| self.rows.get(id)).collect();
        }
        let wanted: HashSet<&Value> = values.iter().collect();
        self.rows
            .values()
            .filter(|row| row.get(column).is_some_and(|v| wanted.contains(v)))
            .collect()
    }

    /// Apply `changes` to every row matching `filter`
    ///
    /// All-or-nothing: if any rewritten row would break a unique
    /// constraint, no row is changed.
    pub fn update(&mut self, filter: &Filter, changes: &IndexRow) -> StoreResult<u64> {
        let matched: Vec<u64> = self
            .rows
            .iter()
            .filter(|(_, row)| filter.matches(row))
            .map(|(id, _)| *id)
            .collect();
        if matched.is_empty() {
            return Ok(0);
        }

        let originals: Vec<(u64, IndexRow)> = matched
            .iter()
            .filter_map(|id| self.rows.get(id).map(|row| (*id, row.clone())))
            .collect();
        for (id, row) in &originals {
            self.unique.remove(*id, row);
        }

        let mut applied: Vec<(u64, IndexRow)> = Vec::with_capacity(originals.len());
        for (id, original) in &originals {
            let mut updated = original.clone();
            updated.merge(changes);
            if !updated.has(&self.spec.primary_key) {
                self.undo_update(&applied, &originals);
                return Err(StoreError::InvalidRow {
                    table: self.spec.table.clone(),
                    reason: format!("update clears primary key '{}'", self.spec.primary_key),
                });
            }
            if let Some(column) = self.unique.conflict(&updated, Some(*id)) {
                let err = self.violation(column);
                self.undo_update(&applied, &originals);
                return Err(err);
            }
            self.unique.insert(*id, &updated);
            applied.push((*id, updated));
        }

        for (id, row) in applied {
            self.rows.insert(id, row);
        }
        Ok(originals.len() as u64)
    }

    fn undo_update(&mut self, applied: &[(u64, IndexRow)], originals: &[(u64, IndexRow)]) {
        for (id, row) in applied {
            self.unique.remove(*id, row);
        }
        for (id, row) in originals {
            self.unique.insert(*id, row);
        }
    }

    /// Delete every row matching `filter`
    pub fn delete(&mut self, filter: &Filter) -> u64 {
        let matched: Vec<u64> = self
            .rows
            .iter()
            .filter(|(_, row)| filter.matches(row))
            .map(|(id, _)| *id)
            .collect();
        for id in &matched {
            if let Some(row) = self.rows.remove(id) {
                self.unique.remove(*id, &row);
            }
        }
        matched.len() as u64
    }

    /// Every committed row, in insertion order
    pub fn rows(&self) -> impl Iterator<Item = &IndexRow> {
        self.rows.values()
    }

    fn violation(&self, column: &str) -> StoreError {
        StoreError::UniqueViolation {
            table: self.spec.table.clone(),
            column: column.to_string(),
        }
    }
}

/// Shared handle: the locked table plus its auto-increment counter
#[derive(Debug)]
pub struct TableHandle {
    table: RwLock<Table>,
    auto_id: AtomicI64,
}

impl TableHandle {
    /// Wrap a fresh table
    pub fn new(spec: IndexTableSpec) -> Self {
        Self {
            table: RwLock::new(Table::new(spec)),
            auto_id: AtomicI64::new(0),
        }
    }

    /// The locked table
    pub fn table(&self) -> &RwLock<Table> {
        &self.table
    }

    /// Allocate the next auto-increment id
    ///
    /// Ids handed to transactions that later roll back are not reused.
    pub fn next_auto_id(&self) -> i64 {
        self.auto_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Keep the counter ahead of an explicitly supplied id
    pub fn observe_id(&self, id: i64) {
        self.auto_id.fetch_max(id, Ordering::SeqCst);
    }
}
