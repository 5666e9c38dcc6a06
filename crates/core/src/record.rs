//! Record contract
//!
//! The routing engine never owns records. Callers hand it anything that
//! implements [`Record`]; the per-type sharding configuration is looked up
//! by [`Record::name`] in the orchestrator's validated catalog.

use std::collections::BTreeMap;

use crate::value::{ShardKey, Value};

/// A record of a distributed record type, as seen by the router
pub trait Record {
    /// Record type name (catalog key)
    fn name(&self) -> &str;

    /// Field value, or None when the field is not set
    fn get(&self, field: &str) -> Option<Value>;

    /// Identifier assigned before the record is inserted, if any
    ///
    /// Bucket-mapped types whose mapping field is the primary key route on
    /// this value, since the stored key does not exist yet.
    fn insert_id(&self) -> Option<ShardKey> {
        None
    }
}

/// Map-backed [`Record`] implementation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleRecord {
    name: String,
    fields: BTreeMap<String, Value>,
    insert_id: Option<ShardKey>,
}

impl SimpleRecord {
    /// Create an empty record of the given type
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            insert_id: None,
        }
    }

    /// Builder-style field assignment
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Builder-style pre-assigned insert id
    pub fn with_insert_id(mut self, id: impl Into<ShardKey>) -> Self {
        self.insert_id = Some(id.into());
        self
    }

    /// Set a field
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }
}

impl Record for SimpleRecord {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, field: &str) -> Option<Value> {
        self.fields.get(field).cloned()
    }

    fn insert_id(&self) -> Option<ShardKey> {
        self.insert_id.clone()
    }
}
