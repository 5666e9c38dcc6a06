//! Core types for keyroute
//!
//! This module defines the foundational types:
//! - ShardId / Shard: identity and placement weight of a partition
//! - BucketId: virtual bucket between business keys and shards
//! - Reservation: result of durably assigning a shard to a new record
//! - IndexRow / Filter: rows and predicates of per-record-type index tables
//! - IndexTableSpec: the physical shape a generator expects of its index table

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::value::{ShardKey, Value};

/// Identifier of a shard
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(String);

impl ShardId {
    /// Create a shard id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ShardId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<ShardId> for Value {
    fn from(id: ShardId) -> Self {
        Value::String(id.0)
    }
}

impl From<&ShardId> for Value {
    fn from(id: &ShardId) -> Self {
        Value::String(id.0.clone())
    }
}

fn default_weight() -> u32 {
    1
}

/// A physical or logical partition
///
/// Loaded once from configuration and never mutated. A weight of zero keeps
/// the shard addressable (existing mappings still resolve to it) but removes
/// it from random placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    /// Shard identifier
    pub id: ShardId,
    /// Relative placement weight
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Connection descriptor handed to the record-persistence layer
    #[serde(default)]
    pub connection: String,
}

impl Shard {
    /// Create a shard without a connection descriptor
    pub fn new(id: impl Into<ShardId>, weight: u32) -> Self {
        Self {
            id: id.into(),
            weight,
            connection: String::new(),
        }
    }

    /// Set the connection descriptor
    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = connection.into();
        self
    }
}

/// Virtual bucket identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketId(pub u64);

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bucket:{}", self.0)
    }
}

/// Outcome of a successful reservation
///
/// Not persisted by itself: the committed index row is the durable record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Shard that owns the record
    pub shard: ShardId,
    /// Identifier generated by the index table, when it owns one
    pub id: Option<i64>,
    /// Business key the reservation was made for
    pub key: Option<ShardKey>,
    /// Virtual bucket, for bucket-mapped record types
    pub bucket: Option<BucketId>,
}

impl Reservation {
    /// Reservation carrying only a shard
    pub fn new(shard: ShardId) -> Self {
        Self {
            shard,
            id: None,
            key: None,
            bucket: None,
        }
    }

    /// Set the generated identifier
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the business key
    pub fn with_key(mut self, key: ShardKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Set the virtual bucket
    pub fn with_bucket(mut self, bucket: BucketId) -> Self {
        self.bucket = Some(bucket);
        self
    }
}

/// A row of an index table, keyed by column name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRow {
    columns: BTreeMap<String, Value>,
}

impl IndexRow {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column assignment
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    /// Set a column
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    /// Get a column; absent columns read as None
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Remove a column, returning its value
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.columns.remove(column)
    }

    /// True if the column is present and non-null
    pub fn has(&self, column: &str) -> bool {
        self.columns.get(column).is_some_and(|v| !v.is_null())
    }

    /// Iterate columns in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.columns.iter()
    }

    /// Overwrite this row's columns with those of `changes`
    pub fn merge(&mut self, changes: &IndexRow) {
        for (column, value) in changes.iter() {
            self.columns.insert(column.clone(), value.clone());
        }
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when the row has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, Value)> for IndexRow {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Conjunction of column equality conditions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Filter matching rows whose `column` equals `value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            conditions: vec![(column.into(), value.into())],
        }
    }

    /// Add another equality condition
    pub fn and(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    /// The conditions, in insertion order
    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Evaluate against a row; a missing column reads as Null
    pub fn matches(&self, row: &IndexRow) -> bool {
        self.conditions
            .iter()
            .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
    }
}

/// Physical shape of an index table
///
/// Produced by key generators so that whatever builds the physical tables
/// knows which column is the primary key, whether it auto-increments and
/// which columns carry a unique constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTableSpec {
    /// Table name
    pub table: String,
    /// Primary key column
    pub primary_key: String,
    /// Whether the primary key is generated by the table
    pub auto_increment: bool,
    /// Additional unique columns
    pub unique: Vec<String>,
}

impl IndexTableSpec {
    /// Table keyed by a caller-supplied primary key
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            auto_increment: false,
            unique: Vec::new(),
        }
    }

    /// Make the primary key auto-increment
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Add a unique column
    pub fn unique(mut self, column: impl Into<String>) -> Self {
        self.unique.push(column.into());
        self
    }

    /// Every column with a uniqueness guarantee, primary key first
    pub fn unique_columns(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_key.as_str()).chain(self.unique.iter().map(String::as_str))
    }
}
