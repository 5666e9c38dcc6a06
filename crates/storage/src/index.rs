//! Unique-column indices
//!
//! Every index table keeps one `UniqueIndex` covering its primary key and
//! unique columns. It maps `column → value → row id` so that:
//! - uniqueness checks on insert/update are O(1) per column
//! - lookups filtered by a unique column skip the full scan
//!
//! Null values are not indexed and never conflict, as in SQL.

use keyroute_core::{IndexRow, Value};
use rustc_hash::FxHashMap;

/// Secondary index: unique column → value → row id
#[derive(Debug, Default)]
pub struct UniqueIndex {
    columns: FxHashMap<String, FxHashMap<Value, u64>>,
}

impl UniqueIndex {
    /// Create an index over the given columns
    pub fn new<'a>(columns: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|c| (c.to_string(), FxHashMap::default()))
                .collect(),
        }
    }

    /// True if `column` carries a unique constraint
    pub fn covers(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Row id holding `value` in a unique column
    pub fn lookup(&self, column: &str, value: &Value) -> Option<u64> {
        self.columns.get(column)?.get(value).copied()
    }

    /// First unique column whose value in `row` is already taken by
    /// another row
    ///
    /// `owner` is the row being rewritten, if any; its own entries do not
    /// count as conflicts.
    pub fn conflict(&self, row: &IndexRow, owner: Option<u64>) -> Option<&str> {
        self.columns.iter().find_map(|(column, values)| {
            let value = row.get(column).filter(|v| !v.is_null())?;
            match values.get(value) {
                Some(id) if Some(*id) != owner => Some(column.as_str()),
                _ => None,
            }
        })
    }

    /// Register a row's unique values
    pub fn insert(&mut self, row_id: u64, row: &IndexRow) {
        for (column, values) in self.columns.iter_mut() {
            if let Some(value) = row.get(column).filter(|v| !v.is_null()) {
                values.insert(value.clone(), row_id);
            }
        }
    }

    /// Forget a row's unique values
    ///
    /// Only entries still pointing at `row_id` are removed.
    pub fn remove(&mut self, row_id: u64, row: &IndexRow) {
        for (column, values) in self.columns.iter_mut() {
            if let Some(value) = row.get(column) {
                if values.get(value) == Some(&row_id) {
                    values.remove(value);
                }
            }
        }
    }

    /// Number of indexed values in a column
    pub fn len(&self, column: &str) -> usize {
        self.columns.get(column).map_or(0, FxHashMap::len)
    }
}
