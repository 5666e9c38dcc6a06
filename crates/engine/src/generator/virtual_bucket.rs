//! Virtual-bucket generator
//!
//! Keys are first mapped to a virtual bucket by a [`BucketMapper`]; the
//! index table then maps buckets (not keys) to shards. Every key of a
//! bucket lives on the bucket's shard, so:
//! - lookups need one row per distinct bucket, not per key
//! - deleting a key's entry removes its whole bucket row
//! - moving a key moves its whole bucket
//!
//! Bucket rows are created with the user-key insert-or-get logic, so the
//! first reservation into a bucket fixes its shard.
//!
//! The mapper is chosen by the declared kind of the mapping field, never by
//! the runtime type of a key. Reservations reject keys of the wrong type;
//! lookups convert them, so `"42"` finds the same bucket as `42`.
//!
//! [`BucketMapper`]: crate::mapper::BucketMapper

use std::collections::BTreeMap;

use keyroute_core::config::VIRTUAL_BUCKET;
use keyroute_core::{
    BucketId, GeneratorOptions, IndexTableSpec, KeyKind, Record, Reservation, RoutingError,
    RoutingResult, ShardId, ShardKey, Value,
};
use tracing::{debug, error};

use super::user_key::UserKeyGenerator;
use super::view::IndexView;
use super::{index_fields, GeneratorDeps, KeyGenerator, ObjectContext};
use crate::mapper::MapperSet;

/// Key -> bucket -> shard mapping
pub struct VirtualBucketGenerator {
    keys: UserKeyGenerator,
    mappers: MapperSet,
    bucket_field: String,
}

fn bucket_value(bucket: BucketId) -> Value {
    // mapper sizes are bounded by i64::MAX, so every bucket fits
    Value::Int(bucket.0 as i64)
}

fn bucket_of(value: &Value) -> Option<BucketId> {
    value.as_int().filter(|v| *v >= 0).map(|v| BucketId(v as u64))
}

impl VirtualBucketGenerator {
    /// Create a generator; mappers are built on first use
    pub fn new(options: GeneratorOptions, deps: GeneratorDeps) -> Self {
        let mappers = MapperSet::new(options.numeric_mapper, options.text_mapper);
        let bucket_field = options.bucket_field.clone();
        Self {
            keys: UserKeyGenerator::new(options, deps, false),
            mappers,
            bucket_field,
        }
    }

    /// The lazily built mappers
    pub fn mappers(&self) -> &MapperSet {
        &self.mappers
    }

    /// Bucket of `key` for a mapping field of `kind`, or None when the
    /// mapper cannot place it
    pub fn bucket(&self, kind: KeyKind, key: &ShardKey) -> Option<BucketId> {
        self.mappers.bucket(kind, key)
    }

    /// Mapper kind of the record type's mapping field
    fn key_kind(ctx: ObjectContext<'_>) -> RoutingResult<KeyKind> {
        let field = ctx.bucket_mapper_key()?;
        ctx.config
            .mapping_field_kind()
            .and_then(|kind| kind.key_kind())
            .ok_or_else(|| {
                RoutingError::configuration(format!(
                    "record type '{}': bucket mapper field '{field}' needs an int or text kind",
                    ctx.record_type
                ))
            })
    }

    fn bucket_in(&self, ctx: ObjectContext<'_>, key: &ShardKey) -> RoutingResult<Option<BucketId>> {
        Ok(self.bucket(Self::key_kind(ctx)?, key))
    }

    fn view<'a>(&'a self, ctx: ObjectContext<'a>) -> IndexView<'a> {
        self.keys.view(ctx, &self.bucket_field)
    }

    /// Key fed to the mapper for `record`
    ///
    /// When the mapping field is the primary key the record is not stored
    /// yet, so its pre-assigned insert id is used.
    fn mapping_key(&self, ctx: ObjectContext<'_>, record: &dyn Record) -> RoutingResult<Option<ShardKey>> {
        let field = ctx.bucket_mapper_key()?;
        let from_field = || record.get(field).as_ref().and_then(ShardKey::from_value);
        Ok(if field == ctx.config.primary_key {
            record.insert_id().or_else(from_field)
        } else {
            from_field()
        })
    }

    fn reservation_error(ctx: ObjectContext<'_>, reason: String) -> RoutingError {
        error!(
            target: "keyroute::reserve",
            record_type = ctx.record_type,
            reason = %reason,
            "Bucket reservation failed"
        );
        RoutingError::reservation_failed(ctx.record_type, reason)
    }
}

impl KeyGenerator for VirtualBucketGenerator {
    fn tag(&self) -> &str {
        VIRTUAL_BUCKET
    }

    fn validate_object(&self, ctx: ObjectContext<'_>) -> RoutingResult<()> {
        Self::key_kind(ctx)?;
        if self.bucket_field == self.keys.shard_field() {
            return Err(RoutingError::configuration(format!(
                "record type '{}': bucket field and shard field are both '{}'",
                ctx.record_type, self.bucket_field
            )));
        }
        Ok(())
    }

    fn index_table_spec(&self, ctx: ObjectContext<'_>) -> RoutingResult<IndexTableSpec> {
        Ok(IndexTableSpec::new(ctx.table(), self.bucket_field.as_str()))
    }

    fn detect_shard(&self, ctx: ObjectContext<'_>, record: &dyn Record) -> RoutingResult<Option<ShardId>> {
        let kind = Self::key_kind(ctx)?;
        match self.mapping_key(ctx, record)?.and_then(|key| self.bucket(kind, &key)) {
            Some(bucket) => self.view(ctx).find(&bucket_value(bucket)),
            None => Ok(None),
        }
    }

    fn reserve_index(
        &self,
        ctx: ObjectContext<'_>,
        record: &dyn Record,
        shard: &ShardId,
    ) -> RoutingResult<Reservation> {
        let field = ctx.bucket_mapper_key()?;
        let kind = Self::key_kind(ctx)?;
        let key = self
            .mapping_key(ctx, record)?
            .ok_or_else(|| Self::reservation_error(ctx, format!("missing bucket key '{field}'")))?;
        if key.kind() != kind {
            return Err(Self::reservation_error(
                ctx,
                format!("field '{field}' expects a {kind} key, got {key}"),
            ));
        }
        let bucket = self
            .bucket(kind, &key)
            .ok_or_else(|| Self::reservation_error(ctx, format!("key {key} maps to no bucket")))?;

        let shard_field = self.keys.shard_field();
        let mut row = index_fields(ctx, record, &[field, self.bucket_field.as_str(), shard_field])?;
        row.set(self.bucket_field.as_str(), bucket_value(bucket));
        row.set(shard_field, shard);

        let stored = self
            .keys
            .reserve_key(ctx, &self.bucket_field, &bucket_value(bucket), row)?;
        let owner = self
            .view(ctx)
            .shard_of(&stored)
            .map_err(|e| Self::reservation_error(ctx, e.to_string()))?;

        debug!(
            target: "keyroute::reserve",
            record_type = ctx.record_type,
            key = %key,
            bucket = bucket.0,
            shard = %owner,
            "Bucket reserved"
        );
        Ok(Reservation::new(owner).with_key(key).with_bucket(bucket))
    }

    fn delete_index(&self, ctx: ObjectContext<'_>, key: &ShardKey) -> RoutingResult<bool> {
        Ok(match self.bucket_in(ctx, key)? {
            Some(bucket) => self.view(ctx).delete(&bucket_value(bucket)),
            None => false,
        })
    }

    fn find_object_shard(&self, ctx: ObjectContext<'_>, key: &ShardKey) -> RoutingResult<Option<ShardId>> {
        match self.bucket_in(ctx, key)? {
            Some(bucket) => self.view(ctx).find(&bucket_value(bucket)),
            None => Ok(None),
        }
    }

    fn find_objects_shards(
        &self,
        ctx: ObjectContext<'_>,
        keys: &[ShardKey],
    ) -> RoutingResult<BTreeMap<ShardId, Vec<ShardKey>>> {
        let kind = Self::key_kind(ctx)?;
        let mut by_bucket: BTreeMap<BucketId, Vec<ShardKey>> = BTreeMap::new();
        for key in keys {
            if let Some(bucket) = self.bucket(kind, key) {
                let members = by_bucket.entry(bucket).or_default();
                if !members.contains(key) {
                    members.push(key.clone());
                }
            }
        }
        let buckets: Vec<Value> = by_bucket.keys().copied().map(bucket_value).collect();

        let mut shards: BTreeMap<ShardId, Vec<ShardKey>> = BTreeMap::new();
        for (value, shard) in self.view(ctx).find_many(&buckets)? {
            let members = bucket_of(&value).and_then(|bucket| by_bucket.remove(&bucket));
            if let Some(members) = members {
                shards.entry(shard).or_default().extend(members);
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

    fn change_shard(&self, ctx: ObjectContext<'_>, key: &ShardKey, shard: &ShardId) -> RoutingResult<bool> {
        match self.bucket_in(ctx, key)? {
            Some(bucket) => self.reassign_bucket(ctx, bucket, shard),
            None => Ok(false),
        }
    }

    fn reassign_bucket(&self, ctx: ObjectContext<'_>, bucket: BucketId, shard: &ShardId) -> RoutingResult<bool> {
        self.view(ctx).set_shard(&bucket_value(bucket), shard)
    }
}
