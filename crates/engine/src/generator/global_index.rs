//! Global-index generator
//!
//! Identifiers come from the index table's own auto-increment primary key;
//! the caller never supplies one. Each reservation inserts one row holding
//! the chosen shard plus the record's indexed fields and reports the
//! generated id. Ids cannot collide, so a failed reservation is never
//! retried.

use std::collections::BTreeMap;
use std::sync::Arc;

use keyroute_core::{
    GeneratorOptions, IndexStore, IndexTableSpec, Record, Reservation, RoutingError,
    RoutingResult, ShardId, ShardKey, StoreError,
};
use tracing::{debug, error};

use super::view::IndexView;
use super::{index_fields, transaction, GeneratorDeps, KeyGenerator, ObjectContext};
use keyroute_core::config::GLOBAL_INDEX;

/// Central auto-increment id allocator
pub struct GlobalIndexGenerator {
    options: GeneratorOptions,
    store: Arc<dyn IndexStore>,
}

impl GlobalIndexGenerator {
    /// Create a generator over `deps.store`
    pub fn new(options: GeneratorOptions, deps: GeneratorDeps) -> Self {
        Self {
            options,
            store: deps.store,
        }
    }

    fn view<'a>(&'a self, ctx: ObjectContext<'a>) -> IndexView<'a> {
        IndexView {
            store: self.store.as_ref(),
            record_type: ctx.record_type,
            table: ctx.table(),
            key_column: &ctx.config.primary_key,
            shard_field: &self.options.shard_field,
        }
    }
}

impl KeyGenerator for GlobalIndexGenerator {
    fn tag(&self) -> &str {
        GLOBAL_INDEX
    }

    fn validate_object(&self, ctx: ObjectContext<'_>) -> RoutingResult<()> {
        if ctx.config.primary_key == self.options.shard_field {
            return Err(RoutingError::configuration(format!(
                "record type '{}': primary key collides with shard field '{}'",
                ctx.record_type, self.options.shard_field
            )));
        }
        Ok(())
    }

    fn index_table_spec(&self, ctx: ObjectContext<'_>) -> RoutingResult<IndexTableSpec> {
        Ok(IndexTableSpec::new(ctx.table(), ctx.config.primary_key.as_str()).auto_increment())
    }

    fn detect_shard(
        &self,
        _ctx: ObjectContext<'_>,
        _record: &dyn Record,
    ) -> RoutingResult<Option<ShardId>> {
        // a new record has no id yet, so nothing can be detected
        Ok(None)
    }

    fn reserve_index(
        &self,
        ctx: ObjectContext<'_>,
        record: &dyn Record,
        shard: &ShardId,
    ) -> RoutingResult<Reservation> {
        let mut row = index_fields(ctx, record, &[self.options.shard_field.as_str()])?;
        row.set(self.options.shard_field.as_str(), shard);

        let table = ctx.table();
        let result = transaction(self.store.as_ref(), |txn| {
            txn.insert(table, row)?.ok_or_else(|| StoreError::Backend(format!(
                "table '{table}' did not generate an id"
            )))
        });

        match result {
            Ok(id) => {
                debug!(
                    target: "keyroute::reserve",
                    record_type = ctx.record_type,
                    id,
                    shard = %shard,
                    "Global id reserved"
                );
                Ok(Reservation::new(shard.clone()).with_id(id))
            }
            Err(e) => {
                error!(
                    target: "keyroute::reserve",
                    record_type = ctx.record_type,
                    shard = %shard,
                    error = %e,
                    "Global id reservation failed"
                );
                Err(RoutingError::reservation_failed(ctx.record_type, e))
            }
        }
    }

    fn delete_index(&self, ctx: ObjectContext<'_>, key: &ShardKey) -> RoutingResult<bool> {
        Ok(self.view(ctx).delete(&key.to_value()))
    }

    fn find_object_shard(
        &self,
        ctx: ObjectContext<'_>,
        key: &ShardKey,
    ) -> RoutingResult<Option<ShardId>> {
        self.view(ctx).find(&key.to_value())
    }

    fn find_objects_shards(
        &self,
        ctx: ObjectContext<'_>,
        keys: &[ShardKey],
    ) -> RoutingResult<BTreeMap<ShardId, Vec<ShardKey>>> {
        let mut values: Vec<_> = keys.iter().map(ShardKey::to_value).collect();
        values.sort();
        values.dedup();

        let mut shards: BTreeMap<ShardId, Vec<ShardKey>> = BTreeMap::new();
        for (value, shard) in self.view(ctx).find_many(&values)? {
            if let Some(key) = ShardKey::from_value(&value) {
                shards.entry(shard).or_default().push(key);
            }
        }
        Ok(shards)
    }

    fn shard_keys(&self, ctx: ObjectContext<'_>, shard: &ShardId) -> RoutingResult<Vec<ShardKey>> {
        Ok(self
            .view(ctx)
            .keys_on(shard)?
            .iter()
            .filter_map(ShardKey::from_value)
            .collect())
    }
}
