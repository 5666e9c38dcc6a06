//! User-key generator
//!
//! The caller supplies a business key (the record's `sharding_key` field);
//! the index table maps it to a shard. Two flavours exist:
//! - with an auto id: the table owns an auto-increment primary key and the
//!   business key is a unique column; reservations report both
//! - without: the business key is the table's primary key
//!
//! # Reservation
//!
//! `insert_or_get_key` is select-then-insert. When the key already has a
//! row, its shard is returned unchanged. Otherwise a transaction inserts the
//! row, re-reads it and commits. Two first writers racing on one key are
//! separated by the table's unique constraint: the loser's insert or commit
//! fails, and `reserve_key` retries exactly once, which then finds the
//! winner's row.

use std::collections::BTreeMap;
use std::sync::Arc;

use keyroute_core::config::{USER_KEY, USER_KEY_NO_INDEX};
use keyroute_core::{
    Filter, GeneratorOptions, IndexRow, IndexStore, IndexTableSpec, Record, Reservation,
    RoutingError, RoutingResult, ShardId, ShardKey, StoreError, StoreResult, Value,
};
use tracing::{debug, error, warn};

use super::view::IndexView;
use super::{index_fields, transaction, GeneratorDeps, KeyGenerator, ObjectContext};
use crate::metrics::RoutingMetrics;

/// Business-key to shard mapping, with or without an auto id
pub struct UserKeyGenerator {
    options: GeneratorOptions,
    store: Arc<dyn IndexStore>,
    metrics: Arc<RoutingMetrics>,
    auto_id: bool,
}

impl UserKeyGenerator {
    /// Create a generator; `auto_id` selects the flavour with an
    /// auto-increment primary key
    pub fn new(options: GeneratorOptions, deps: GeneratorDeps, auto_id: bool) -> Self {
        Self {
            options,
            store: deps.store,
            metrics: deps.metrics,
            auto_id,
        }
    }

    /// True for the flavour that also allocates an id
    pub fn has_auto_id(&self) -> bool {
        self.auto_id
    }

    /// Index-table column holding the shard id
    pub fn shard_field(&self) -> &str {
        &self.options.shard_field
    }

    pub(crate) fn view<'a>(&'a self, ctx: ObjectContext<'a>, key_column: &'a str) -> IndexView<'a> {
        IndexView {
            store: self.store.as_ref(),
            record_type: ctx.record_type,
            table: ctx.table(),
            key_column,
            shard_field: &self.options.shard_field,
        }
    }

    /// Business key carried by `record`, if set and non-empty
    fn record_key(&self, ctx: ObjectContext<'_>, record: &dyn Record) -> RoutingResult<Option<ShardKey>> {
        let field = ctx.sharding_key()?;
        Ok(record.get(field).as_ref().and_then(ShardKey::from_value))
    }

    /// Reserve `row` under `key_column = key`, retrying once
    ///
    /// Returns the authoritative row: the one inserted, or the one a
    /// concurrent or earlier writer committed for the same key.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::ReservationFailed` when both attempts fail.
    pub fn reserve_key(
        &self,
        ctx: ObjectContext<'_>,
        key_column: &str,
        key: &Value,
        row: IndexRow,
    ) -> RoutingResult<IndexRow> {
        let table = ctx.table();
        match self.insert_or_get_key(table, key_column, key, row.clone()) {
            Ok(found) => Ok(found),
            Err(first) => {
                self.metrics.record_retry();
                warn!(
                    target: "keyroute::reserve",
                    record_type = ctx.record_type,
                    key = %key,
                    error = %first,
                    "Key reservation failed, retrying once"
                );
                self.insert_or_get_key(table, key_column, key, row).map_err(|e| {
                    error!(
                        target: "keyroute::reserve",
                        record_type = ctx.record_type,
                        key = %key,
                        error = %e,
                        "Key reservation failed"
                    );
                    RoutingError::reservation_failed(ctx.record_type, e)
                })
            }
        }
    }

    /// Select the row of `key`, inserting `row` when none exists
    ///
    /// Single attempt; the insert and its read-back share one transaction.
    pub fn insert_or_get_key(
        &self,
        table: &str,
        key_column: &str,
        key: &Value,
        row: IndexRow,
    ) -> StoreResult<IndexRow> {
        let filter = Filter::eq(key_column, key.clone());
        if let Some(existing) = self.store.select_one(table, &filter)? {
            return Ok(existing);
        }
        transaction(self.store.as_ref(), |txn| {
            txn.insert(table, row)?;
            txn.select_one(table, &filter)?.ok_or_else(|| StoreError::Backend(format!(
                "row for {key_column}={key} vanished inside its transaction"
            )))
        })
    }

    fn reservation(
        &self,
        view: &IndexView<'_>,
        primary_key: &str,
        key: ShardKey,
        row: &IndexRow,
    ) -> RoutingResult<Reservation> {
        let shard = view
            .shard_of(row)
            .map_err(|e| RoutingError::reservation_failed(view.record_type, e))?;
        let mut reservation = Reservation::new(shard).with_key(key);
        if self.auto_id {
            if let Some(id) = row.get(primary_key).and_then(Value::as_int) {
                reservation = reservation.with_id(id);
            }
        }
        Ok(reservation)
    }
}

impl KeyGenerator for UserKeyGenerator {
    fn tag(&self) -> &str {
        if self.auto_id {
            USER_KEY
        } else {
            USER_KEY_NO_INDEX
        }
    }

    fn validate_object(&self, ctx: ObjectContext<'_>) -> RoutingResult<()> {
        let key = ctx.sharding_key()?;
        if key == self.options.shard_field {
            return Err(RoutingError::configuration(format!(
                "record type '{}': sharding key collides with shard field '{}'",
                ctx.record_type, self.options.shard_field
            )));
        }
        if self.auto_id && key == ctx.config.primary_key {
            return Err(RoutingError::configuration(format!(
                "record type '{}': sharding key '{}' is the auto-id column; use {}",
                ctx.record_type, key, USER_KEY_NO_INDEX
            )));
        }
        Ok(())
    }

    fn index_table_spec(&self, ctx: ObjectContext<'_>) -> RoutingResult<IndexTableSpec> {
        let key = ctx.sharding_key()?;
        Ok(if self.auto_id {
            IndexTableSpec::new(ctx.table(), ctx.config.primary_key.as_str())
                .auto_increment()
                .unique(key)
        } else {
            IndexTableSpec::new(ctx.table(), key)
        })
    }

    fn detect_shard(&self, ctx: ObjectContext<'_>, record: &dyn Record) -> RoutingResult<Option<ShardId>> {
        match self.record_key(ctx, record)? {
            Some(key) => self.view(ctx, ctx.sharding_key()?).find(&key.to_value()),
            None => Ok(None),
        }
    }

    fn reserve_index(
        &self,
        ctx: ObjectContext<'_>,
        record: &dyn Record,
        shard: &ShardId,
    ) -> RoutingResult<Reservation> {
        let key_column = ctx.sharding_key()?;
        let key = self.record_key(ctx, record)?.ok_or_else(|| {
            error!(
                target: "keyroute::reserve",
                record_type = ctx.record_type,
                field = key_column,
                "Record has no sharding key"
            );
            RoutingError::reservation_failed(
                ctx.record_type,
                format!("missing sharding key '{key_column}'"),
            )
        })?;

        let key_value = key.to_value();
        let mut row = index_fields(ctx, record, &[key_column, self.options.shard_field.as_str()])?;
        row.set(key_column, key_value.clone());
        row.set(self.options.shard_field.as_str(), shard);

        let stored = self.reserve_key(ctx, key_column, &key_value, row)?;
        let view = self.view(ctx, key_column);
        let reservation = self.reservation(&view, &ctx.config.primary_key, key, &stored)?;
        debug!(
            target: "keyroute::reserve",
            record_type = ctx.record_type,
            key = %key_value,
            shard = %reservation.shard,
            "Key reserved"
        );
        Ok(reservation)
    }

    fn delete_index(&self, ctx: ObjectContext<'_>, key: &ShardKey) -> RoutingResult<bool> {
        Ok(self.view(ctx, ctx.sharding_key()?).delete(&key.to_value()))
    }

    fn find_object_shard(&self, ctx: ObjectContext<'_>, key: &ShardKey) -> RoutingResult<Option<ShardId>> {
        self.view(ctx, ctx.sharding_key()?).find(&key.to_value())
    }

    fn find_objects_shards(
        &self,
        ctx: ObjectContext<'_>,
        keys: &[ShardKey],
    ) -> RoutingResult<BTreeMap<ShardId, Vec<ShardKey>>> {
        let mut values: Vec<Value> = keys.iter().map(ShardKey::to_value).collect();
        values.sort();
        values.dedup();

        let mut shards: BTreeMap<ShardId, Vec<ShardKey>> = BTreeMap::new();
        for (value, shard) in self.view(ctx, ctx.sharding_key()?).find_many(&values)? {
            if let Some(key) = ShardKey::from_value(&value) {
                shards.entry(shard).or_default().push(key);
            }
        }
        Ok(shards)
    }

    fn shard_keys(&self, ctx: ObjectContext<'_>, shard: &ShardId) -> RoutingResult<Vec<ShardKey>> {
        Ok(self
            .view(ctx, ctx.sharding_key()?)
            .keys_on(shard)?
            .iter()
            .filter_map(ShardKey::from_value)
            .collect())
    }

    fn change_shard(&self, ctx: ObjectContext<'_>, key: &ShardKey, shard: &ShardId) -> RoutingResult<bool> {
        self.view(ctx, ctx.sharding_key()?).set_shard(&key.to_value(), shard)
    }
}
