//! Shard orchestrator
//!
//! The orchestrator is the public routing API. It owns:
//! - the shard registry and its weight map
//! - one key generator per configured sharding type
//! - the validated per-record-type sharding settings
//! - an optional [`Router`] consulted before random placement
//! - routing metrics
//!
//! Everything is built once by [`OrchestratorBuilder::build`] and is
//! read-only afterwards; the orchestrator is `Send + Sync` and meant to be
//! shared through `Arc`.
//!
//! # Reservation flow
//!
//! ```text
//! reserve_index(record)
//!   -> generator.detect_shard(record)          existing mapping?
//!   -> router.find_shard(record)               explicit rule?
//!   -> random_shard()                          weighted fallback
//!   -> generator.reserve_index(record, shard)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use keyroute_core::{
    BucketId, IndexStore, IndexTableSpec, Record, Reservation, RoutingConfig, RoutingError,
    RoutingResult, Shard, ShardId, ShardKey, ShardingConfig,
};
use tracing::{debug, error, info, warn};

use crate::generator::{GeneratorDeps, GeneratorRegistry, KeyGenerator, ObjectContext};
use crate::metrics::{MetricsSnapshot, RoutingMetrics};
use crate::registry::ShardRegistry;
use crate::router::{FieldRouter, Router};

/// Public entry point of the routing engine
pub struct ShardOrchestrator {
    registry: ShardRegistry,
    objects: BTreeMap<String, ShardingConfig>,
    /// Sharding type name -> generator
    generators: BTreeMap<String, Box<dyn KeyGenerator>>,
    router: Option<Arc<dyn Router>>,
    metrics: Arc<RoutingMetrics>,
}

impl ShardOrchestrator {
    /// Build an orchestrator with the built-in generators
    ///
    /// Routes in `config.routes` are served by a [`FieldRouter`].
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::Configuration` if the configuration is invalid.
    pub fn new(config: RoutingConfig, store: Arc<dyn IndexStore>) -> RoutingResult<Self> {
        Self::builder(config, store).build()
    }

    /// Start a builder
    pub fn builder(config: RoutingConfig, store: Arc<dyn IndexStore>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config, store)
    }

    fn context(&self, record_type: &str) -> RoutingResult<(ObjectContext<'_>, &dyn KeyGenerator)> {
        let (name, config) = self.objects.get_key_value(record_type).ok_or_else(|| {
            RoutingError::configuration(format!("record type '{record_type}' is not distributed"))
        })?;
        let generator = self.generators.get(&config.sharding_type).ok_or_else(|| {
            RoutingError::configuration(format!(
                "record type '{record_type}' uses unknown sharding type '{}'",
                config.sharding_type
            ))
        })?;
        Ok((ObjectContext::new(name, config), generator.as_ref()))
    }

    fn check_shard(&self, shard: &ShardId) -> RoutingResult<()> {
        if self.registry.contains(shard) {
            Ok(())
        } else {
            Err(RoutingError::UnknownShard(shard.clone()))
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Shard owning `key` of `record_type`, or None when it has no mapping
    pub fn find_object_shard(&self, record_type: &str, key: &ShardKey) -> RoutingResult<Option<ShardId>> {
        let (ctx, generator) = self.context(record_type)?;
        let shard = generator.find_object_shard(ctx, key)?;
        self.metrics.record_lookup(1, u64::from(shard.is_none()));
        Ok(shard)
    }

    /// Shards of many keys, grouped by shard, in one store round trip
    ///
    /// Keys without a mapping are absent from the result.
    pub fn find_objects_shards(
        &self,
        record_type: &str,
        keys: &[ShardKey],
    ) -> RoutingResult<BTreeMap<ShardId, Vec<ShardKey>>> {
        let (ctx, generator) = self.context(record_type)?;
        let shards = generator.find_objects_shards(ctx, keys)?;
        // a key repeated in the batch is at most one miss
        let requested: BTreeSet<&ShardKey> = keys.iter().collect();
        let found: BTreeSet<&ShardKey> = shards.values().flatten().collect();
        let misses = requested.difference(&found).count();
        self.metrics.record_lookup(keys.len() as u64, misses as u64);
        Ok(shards)
    }

    /// Shard an existing mapping assigns to `record`, if any
    pub fn detect_shard(&self, record: &dyn Record) -> RoutingResult<Option<ShardId>> {
        let (ctx, generator) = self.context(record.name())?;
        generator.detect_shard(ctx, record)
    }

    /// Every key (or bucket, for bucket-mapped types) mapped to `shard`
    pub fn shard_keys(&self, record_type: &str, shard: &ShardId) -> RoutingResult<Vec<ShardKey>> {
        let (ctx, generator) = self.context(record_type)?;
        generator.shard_keys(ctx, shard)
    }

    // ------------------------------------------------------------------
    // Reservation
    // ------------------------------------------------------------------

    /// Place `record` on a shard and durably reserve its index entry
    ///
    /// # Errors
    ///
    /// - `RoutingError::Configuration` for record types that are not
    ///   distributed, or a router returning an unregistered shard
    /// - `RoutingError::ReservationFailed` when the store rejects the entry
    ///   or fails while looking for an existing mapping
    pub fn reserve_index(&self, record: &dyn Record) -> RoutingResult<Reservation> {
        let (ctx, generator) = self.context(record.name())?;
        let placed = self.place(ctx, generator, record).map_err(|e| {
            self.metrics.record_reservation_failure();
            if e.is_fatal() {
                return e;
            }
            error!(
                target: "keyroute::reserve",
                record_type = ctx.record_type,
                error = %e,
                "Shard detection failed"
            );
            RoutingError::reservation_failed(ctx.record_type, e)
        })?;
        let shard = match placed {
            Some(shard) => shard,
            None => {
                self.metrics.record_random_assignment();
                self.random_shard()
            }
        };

        match generator.reserve_index(ctx, record, &shard) {
            Ok(reservation) => {
                self.metrics.record_reservation();
                debug!(
                    target: "keyroute::reserve",
                    record_type = ctx.record_type,
                    candidate = %shard,
                    shard = %reservation.shard,
                    "Index reserved"
                );
                Ok(reservation)
            }
            Err(e) => {
                self.metrics.record_reservation_failure();
                Err(e)
            }
        }
    }

    /// Detected or routed shard for a new record
    fn place(
        &self,
        ctx: ObjectContext<'_>,
        generator: &dyn KeyGenerator,
        record: &dyn Record,
    ) -> RoutingResult<Option<ShardId>> {
        if let Some(shard) = generator.detect_shard(ctx, record)? {
            return Ok(Some(shard));
        }
        let Some(router) = self.router.as_ref().filter(|r| r.has_routes(ctx.record_type)) else {
            return Ok(None);
        };
        match router.find_shard(record) {
            Some(shard) if !self.registry.contains(&shard) => Err(RoutingError::configuration(format!(
                "router sent record type '{}' to unknown shard '{shard}'",
                ctx.record_type
            ))),
            routed => Ok(routed),
        }
    }

    /// Remove the index entry of `index_id`
    ///
    /// Returns false when nothing was removed, including when the store
    /// failed (the failure is logged).
    pub fn delete_index(&self, record: &dyn Record, index_id: &ShardKey) -> RoutingResult<bool> {
        let (ctx, generator) = self.context(record.name())?;
        let removed = generator.delete_index(ctx, index_id)?;
        if removed {
            self.metrics.record_delete();
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    /// Move the mapping of `key` to `new_shard`
    ///
    /// Supported by the user-key family; for bucket-mapped types the key's
    /// whole bucket moves. Returns false when `key` has no mapping.
    pub fn change_shard(&self, record_type: &str, key: &ShardKey, new_shard: &ShardId) -> RoutingResult<bool> {
        self.check_shard(new_shard)?;
        let (ctx, generator) = self.context(record_type)?;
        let changed = generator.change_shard(ctx, key, new_shard)?;
        if changed {
            info!(target: "keyroute::admin", record_type, key = %key, shard = %new_shard, "Shard changed");
        } else {
            warn!(target: "keyroute::admin", record_type, key = %key, "No mapping to change");
        }
        Ok(changed)
    }

    /// Move a whole virtual bucket to `new_shard`
    pub fn reassign_bucket(&self, record_type: &str, bucket: BucketId, new_shard: &ShardId) -> RoutingResult<bool> {
        self.check_shard(new_shard)?;
        let (ctx, generator) = self.context(record_type)?;
        let changed = generator.reassign_bucket(ctx, bucket, new_shard)?;
        if changed {
            info!(target: "keyroute::admin", record_type, bucket = bucket.0, shard = %new_shard, "Bucket reassigned");
        }
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Shards
    // ------------------------------------------------------------------

    /// Weighted random shard
    pub fn random_shard(&self) -> ShardId {
        self.registry.random_shard()
    }

    /// Weighted random shard outside `excluded`; None when nothing remains
    pub fn random_shard_except(&self, excluded: &[ShardId]) -> Option<ShardId> {
        self.registry.random_shard_except(excluded)
    }

    /// All configured shards
    pub fn shards(&self) -> &[Shard] {
        self.registry.shards()
    }

    /// Shard by id
    pub fn shard(&self, id: &ShardId) -> Option<&Shard> {
        self.registry.get(id)
    }

    /// The shard registry
    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    /// Sharding settings of `record_type`
    pub fn sharding_config(&self, record_type: &str) -> Option<&ShardingConfig> {
        self.objects.get(record_type)
    }

    /// True if `record_type` is horizontally partitioned
    pub fn is_distributed(&self, record_type: &str) -> bool {
        self.objects.contains_key(record_type)
    }

    /// Index table shapes of every distributed record type
    pub fn index_table_specs(&self) -> RoutingResult<Vec<IndexTableSpec>> {
        self.objects
            .keys()
            .map(|record_type| {
                let (ctx, generator) = self.context(record_type)?;
                generator.index_table_spec(ctx)
            })
            .collect()
    }

    /// Current metric values
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl fmt::Debug for ShardOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardOrchestrator")
            .field("shards", &self.registry.shards().len())
            .field("objects", &self.objects.keys().collect::<Vec<_>>())
            .field("generators", &self.generators.keys().collect::<Vec<_>>())
            .field("router", &self.router.is_some())
            .finish()
    }
}

/// Builder for [`ShardOrchestrator`]
pub struct OrchestratorBuilder {
    config: RoutingConfig,
    store: Arc<dyn IndexStore>,
    router: Option<Arc<dyn Router>>,
    generators: GeneratorRegistry,
}

impl OrchestratorBuilder {
    /// Builder over a configuration and a store
    pub fn new(config: RoutingConfig, store: Arc<dyn IndexStore>) -> Self {
        Self {
            config,
            store,
            router: None,
            generators: GeneratorRegistry::with_builtins(),
        }
    }

    /// Use `router` instead of the configured field routes
    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Resolve generator tags through `registry`
    pub fn with_generator_registry(mut self, registry: GeneratorRegistry) -> Self {
        self.generators = registry;
        self
    }

    /// Validate everything and build the orchestrator
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::Configuration` for invalid configuration,
    /// unknown generator tags or record types a generator rejects.
    pub fn build(self) -> RoutingResult<ShardOrchestrator> {
        self.config.validate()?;
        let registry = ShardRegistry::new(self.config.shards.clone())?;
        let metrics = Arc::new(RoutingMetrics::new());

        let mut generators = BTreeMap::new();
        for (name, sharding_type) in &self.config.sharding_types {
            let deps = GeneratorDeps {
                store: Arc::clone(&self.store),
                metrics: Arc::clone(&metrics),
            };
            let generator = self
                .generators
                .build(&sharding_type.generator, &sharding_type.options, deps)
                .map_err(|e| {
                    RoutingError::configuration(format!("sharding type '{name}': {e}"))
                })?;
            generators.insert(name.clone(), generator);
        }

        for (record_type, object) in &self.config.objects {
            let generator = generators.get(&object.sharding_type).ok_or_else(|| {
                RoutingError::configuration(format!(
                    "record type '{record_type}' uses unknown sharding type '{}'",
                    object.sharding_type
                ))
            })?;
            generator.validate_object(ObjectContext::new(record_type, object))?;
        }

        let router = match self.router {
            Some(router) => Some(router),
            None if !self.config.routes.is_empty() => {
                Some(Arc::new(FieldRouter::from_config(&self.config)) as Arc<dyn Router>)
            }
            None => None,
        };

        info!(
            target: "keyroute::admin",
            shards = registry.shards().len(),
            total_weight = registry.total_weight(),
            objects = self.config.objects.len(),
            sharding_types = generators.len(),
            router = router.is_some(),
            "Shard orchestrator ready"
        );

        Ok(ShardOrchestrator {
            registry,
            objects: self.config.objects,
            generators,
            router,
            metrics,
        })
    }
}
