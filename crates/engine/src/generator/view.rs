//! Key-column view of an index table
//!
//! Every built-in generator addresses its index table through one key
//! column (primary key, business key or bucket) and one shard column. This
//! view wraps the store calls and turns store failures into routing
//! errors, logging them at the lookup boundary.

use keyroute_core::{
    Filter, IndexRow, IndexStore, RoutingError, RoutingResult, ShardId, StoreError, Value,
};
use tracing::{error, warn};

#[derive(Clone, Copy)]
pub(crate) struct IndexView<'a> {
    pub store: &'a dyn IndexStore,
    pub record_type: &'a str,
    pub table: &'a str,
    pub key_column: &'a str,
    pub shard_field: &'a str,
}

impl<'a> IndexView<'a> {
    pub fn key_filter(&self, key: &Value) -> Filter {
        Filter::eq(self.key_column, key.clone())
    }

    /// Shard named by a row
    pub fn shard_of(&self, row: &IndexRow) -> Result<ShardId, StoreError> {
        row.get(self.shard_field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ShardId::from)
            .ok_or_else(|| StoreError::InvalidRow {
                table: self.table.to_string(),
                reason: format!("no shard in column '{}'", self.shard_field),
            })
    }

    /// Row holding `key`, if any
    pub fn find_row(&self, key: &Value) -> RoutingResult<Option<IndexRow>> {
        self.store
            .select_one(self.table, &self.key_filter(key))
            .map_err(|e| self.lookup_error(key, e))
    }

    /// Shard mapped to `key`, if any
    pub fn find(&self, key: &Value) -> RoutingResult<Option<ShardId>> {
        match self.find_row(key)? {
            Some(row) => self.shard_of(&row).map(Some).map_err(|e| self.lookup_error(key, e)),
            None => Ok(None),
        }
    }

    /// `(key, shard)` of every row whose key is one of `keys`, in one query
    pub fn find_many(&self, keys: &[Value]) -> RoutingResult<Vec<(Value, ShardId)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .store
            .select_in(self.table, self.key_column, keys)
            .map_err(|e| self.batch_error(keys.len(), e))?;
        rows.iter()
            .filter_map(|row| {
                let key = row.get(self.key_column)?.clone();
                Some(self.shard_of(row).map(|shard| (key, shard)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.batch_error(keys.len(), e))
    }

    /// Keys of every row naming `shard`
    pub fn keys_on(&self, shard: &ShardId) -> RoutingResult<Vec<Value>> {
        let rows = self
            .store
            .select_where(self.table, &Filter::eq(self.shard_field, shard))
            .map_err(|e| {
                error!(
                    target: "keyroute::lookup",
                    record_type = self.record_type,
                    shard = %shard,
                    error = %e,
                    "Shard scan failed"
                );
                RoutingError::lookup_failed(self.record_type, e)
            })?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.remove(self.key_column))
            .collect())
    }

    /// Delete the row of `key`; store failures are logged and reported as
    /// "nothing deleted"
    pub fn delete(&self, key: &Value) -> bool {
        match self.store.delete(self.table, &self.key_filter(key)) {
            Ok(removed) => removed > 0,
            Err(e) => {
                warn!(
                    target: "keyroute::admin",
                    record_type = self.record_type,
                    key = %key,
                    error = %e,
                    "Index delete failed"
                );
                false
            }
        }
    }

    /// Point the row of `key` at `shard`; false when no row exists
    pub fn set_shard(&self, key: &Value, shard: &ShardId) -> RoutingResult<bool> {
        let changes = IndexRow::new().with(self.shard_field, shard);
        match self.store.update(self.table, &self.key_filter(key), &changes) {
            Ok(changed) => Ok(changed > 0),
            Err(e) => {
                error!(
                    target: "keyroute::admin",
                    record_type = self.record_type,
                    key = %key,
                    shard = %shard,
                    error = %e,
                    "Shard reassignment failed"
                );
                Err(RoutingError::reservation_failed(self.record_type, e))
            }
        }
    }

    fn lookup_error(&self, key: &Value, e: StoreError) -> RoutingError {
        error!(
            target: "keyroute::lookup",
            record_type = self.record_type,
            key = %key,
            error = %e,
            "Index lookup failed"
        );
        RoutingError::lookup_failed(self.record_type, e)
    }

    fn batch_error(&self, keys: usize, e: StoreError) -> RoutingError {
        error!(
            target: "keyroute::lookup",
            record_type = self.record_type,
            keys,
            error = %e,
            "Batched index lookup failed"
        );
        RoutingError::lookup_failed(self.record_type, e)
    }
}
