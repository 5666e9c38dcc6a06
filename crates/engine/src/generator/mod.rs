//! Key generators
//!
//! A key generator implements one sharding strategy for a record type: it
//! detects an existing placement, reserves a new index entry, resolves keys
//! back to shards and deletes entries. Generators are selected by string tag
//! through a [`GeneratorRegistry`] when the orchestrator is built, and one
//! instance serves every record type of a sharding type; per-type settings
//! arrive with each call in an [`ObjectContext`].
//!
//! Built-in tags:
//! - `global_index`: [`GlobalIndexGenerator`]
//! - `user_key`, `user_key_no_index`: [`UserKeyGenerator`]
//! - `virtual_bucket`: [`VirtualBucketGenerator`]

mod global_index;
mod user_key;
mod view;
mod virtual_bucket;

pub use global_index::GlobalIndexGenerator;
pub use user_key::UserKeyGenerator;
pub use virtual_bucket::VirtualBucketGenerator;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use keyroute_core::config::{GLOBAL_INDEX, USER_KEY, USER_KEY_NO_INDEX, VIRTUAL_BUCKET};
use keyroute_core::{
    BucketId, GeneratorOptions, IndexRow, IndexStore, IndexTableSpec, IndexTransaction, Record,
    Reservation, RoutingError, RoutingResult, ShardId, ShardKey, ShardingConfig, StoreResult,
};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::metrics::RoutingMetrics;

/// Record type name plus its validated sharding settings
#[derive(Debug, Clone, Copy)]
pub struct ObjectContext<'a> {
    /// Record type name
    pub record_type: &'a str,
    /// Sharding settings of the record type
    pub config: &'a ShardingConfig,
}

impl<'a> ObjectContext<'a> {
    /// Bundle a record type with its settings
    pub fn new(record_type: &'a str, config: &'a ShardingConfig) -> Self {
        Self {
            record_type,
            config,
        }
    }

    /// Index table name
    pub fn table(&self) -> &'a str {
        &self.config.index_object
    }

    /// Business-key field; a configuration error when unset
    pub fn sharding_key(&self) -> RoutingResult<&'a str> {
        self.config.sharding_key.as_deref().ok_or_else(|| {
            RoutingError::configuration(format!(
                "record type '{}' has no sharding_key",
                self.record_type
            ))
        })
    }

    /// Bucket mapping field; a configuration error when unset
    pub fn bucket_mapper_key(&self) -> RoutingResult<&'a str> {
        self.config.bucket_mapper_key.as_deref().ok_or_else(|| {
            RoutingError::configuration(format!(
                "record type '{}' has no bucket_mapper_key",
                self.record_type
            ))
        })
    }
}

/// Strategy for placing and locating records of a sharding type
///
/// Every method receives the record type's [`ObjectContext`]. Store
/// failures never escape raw: reservations fail with
/// `RoutingError::ReservationFailed`, lookups with
/// `RoutingError::LookupFailed`, and a missing key is `Ok(None)`.
pub trait KeyGenerator: Send + Sync {
    /// Registered tag of this generator
    fn tag(&self) -> &str;

    /// Check that a record type's settings suit this generator
    fn validate_object(&self, ctx: ObjectContext<'_>) -> RoutingResult<()>;

    /// Shape of the index table this generator reads and writes
    fn index_table_spec(&self, ctx: ObjectContext<'_>) -> RoutingResult<IndexTableSpec>;

    /// Shard an existing mapping already assigns to `record`, if any
    fn detect_shard(&self, ctx: ObjectContext<'_>, record: &dyn Record)
        -> RoutingResult<Option<ShardId>>;

    /// Durably reserve an index entry placing `record` on `shard`
    ///
    /// The returned reservation may name a different shard when a mapping
    /// for the record's key already exists.
    fn reserve_index(
        &self,
        ctx: ObjectContext<'_>,
        record: &dyn Record,
        shard: &ShardId,
    ) -> RoutingResult<Reservation>;

    /// Remove the index entry of `key`; false when nothing was removed
    fn delete_index(&self, ctx: ObjectContext<'_>, key: &ShardKey) -> RoutingResult<bool>;

    /// Shard of `key`, or None when no mapping exists
    fn find_object_shard(&self, ctx: ObjectContext<'_>, key: &ShardKey)
        -> RoutingResult<Option<ShardId>>;

    /// Shards of many keys in one store round trip, grouped by shard
    ///
    /// Keys without a mapping are absent from the result.
    fn find_objects_shards(
        &self,
        ctx: ObjectContext<'_>,
        keys: &[ShardKey],
    ) -> RoutingResult<BTreeMap<ShardId, Vec<ShardKey>>>;

    /// Every key (or bucket) currently mapped to `shard`
    fn shard_keys(&self, ctx: ObjectContext<'_>, shard: &ShardId) -> RoutingResult<Vec<ShardKey>>;

    /// Move the mapping of `key` to `shard`; false when no mapping exists
    fn change_shard(
        &self,
        ctx: ObjectContext<'_>,
        _key: &ShardKey,
        _shard: &ShardId,
    ) -> RoutingResult<bool> {
        Err(unsupported(ctx, "change_shard"))
    }

    /// Move a whole bucket to `shard`; false when the bucket has no row
    fn reassign_bucket(
        &self,
        ctx: ObjectContext<'_>,
        _bucket: BucketId,
        _shard: &ShardId,
    ) -> RoutingResult<bool> {
        Err(unsupported(ctx, "reassign_bucket"))
    }
}

fn unsupported(ctx: ObjectContext<'_>, operation: &'static str) -> RoutingError {
    RoutingError::Unsupported {
        record_type: ctx.record_type.to_string(),
        operation,
    }
}

/// Shared services handed to generator factories
#[derive(Clone)]
pub struct GeneratorDeps {
    /// Backing index store
    pub store: Arc<dyn IndexStore>,
    /// Metrics of the owning orchestrator
    pub metrics: Arc<RoutingMetrics>,
}

impl fmt::Debug for GeneratorDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorDeps").finish_non_exhaustive()
    }
}

/// Builds a generator from its sharding type's options
pub type GeneratorFactory =
    Box<dyn Fn(&GeneratorOptions, GeneratorDeps) -> RoutingResult<Box<dyn KeyGenerator>> + Send + Sync>;

/// Generator tag -> factory
pub struct GeneratorRegistry {
    factories: FxHashMap<String, GeneratorFactory>,
}

impl GeneratorRegistry {
    /// Registry with no generators
    pub fn empty() -> Self {
        Self {
            factories: FxHashMap::default(),
        }
    }

    /// Registry holding the built-in generators
    pub fn with_builtins() -> Self {
        Self::empty()
            .register(GLOBAL_INDEX, |options, deps| {
                Ok(Box::new(GlobalIndexGenerator::new(options.clone(), deps)))
            })
            .register(USER_KEY, |options, deps| {
                Ok(Box::new(UserKeyGenerator::new(options.clone(), deps, true)))
            })
            .register(USER_KEY_NO_INDEX, |options, deps| {
                Ok(Box::new(UserKeyGenerator::new(options.clone(), deps, false)))
            })
            .register(VIRTUAL_BUCKET, |options, deps| {
                Ok(Box::new(VirtualBucketGenerator::new(options.clone(), deps)))
            })
    }

    /// Register (or replace) the factory for `tag`
    pub fn register<F>(mut self, tag: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&GeneratorOptions, GeneratorDeps) -> RoutingResult<Box<dyn KeyGenerator>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(tag.into(), Box::new(factory));
        self
    }

    /// True if a factory is registered for `tag`
    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Instantiate the generator registered for `tag`
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::Configuration` for unknown tags.
    pub fn build(
        &self,
        tag: &str,
        options: &GeneratorOptions,
        deps: GeneratorDeps,
    ) -> RoutingResult<Box<dyn KeyGenerator>> {
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| RoutingError::configuration(format!("unknown key generator '{tag}'")))?;
        factory(options, deps)
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

/// Denormalized index fields of `record`
///
/// Copies every configured indexed field the record sets, skipping the
/// columns listed in `skip` (primary key, shard and key columns are owned
/// by the generator).
///
/// # Errors
///
/// Returns `RoutingError::ReservationFailed` when a value does not match
/// its declared kind.
pub fn index_fields(
    ctx: ObjectContext<'_>,
    record: &dyn Record,
    skip: &[&str],
) -> RoutingResult<IndexRow> {
    let mut row = IndexRow::new();
    for field in &ctx.config.indexed_fields {
        if field.name == ctx.config.primary_key || skip.contains(&field.name.as_str()) {
            continue;
        }
        let Some(value) = record.get(&field.name) else {
            continue;
        };
        if !field.kind.accepts(&value) {
            return Err(RoutingError::reservation_failed(
                ctx.record_type,
                format!(
                    "field '{}' expects {}, got {}",
                    field.name,
                    field.kind,
                    value.type_name()
                ),
            ));
        }
        row.set(field.name.as_str(), value);
    }
    Ok(row)
}

/// Run `f` inside a store transaction
///
/// Commits when `f` succeeds; rolls back and returns `f`'s error
/// otherwise.
pub(crate) fn transaction<T>(
    store: &dyn IndexStore,
    f: impl FnOnce(&mut dyn IndexTransaction) -> StoreResult<T>,
) -> StoreResult<T> {
    let mut txn = store.begin()?;
    match f(&mut *txn) {
        Ok(value) => {
            txn.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = txn.rollback() {
                warn!(target: "keyroute::store", error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}
