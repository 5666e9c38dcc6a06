//! Shard registry
//!
//! The registry is built once from the configured shard list and is
//! read-only afterwards. It owns the weight map used by
//! [`ShardRegistry::random_shard`]; exclusion queries build a temporary
//! map over the remaining shards.

use std::collections::HashSet;

use keyroute_core::{RoutingError, RoutingResult, Shard, ShardId};
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::weight::WeightMap;

/// Configured shards plus their weight map
#[derive(Debug, Clone)]
pub struct ShardRegistry {
    shards: Vec<Shard>,
    by_id: FxHashMap<ShardId, usize>,
    weights: WeightMap<ShardId>,
}

impl ShardRegistry {
    /// Build a registry
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::Configuration` if the list is empty, holds a
    /// duplicate id or carries no weight at all.
    pub fn new(shards: Vec<Shard>) -> RoutingResult<Self> {
        if shards.is_empty() {
            return Err(RoutingError::configuration("no shards configured"));
        }
        let mut by_id = FxHashMap::default();
        for (idx, shard) in shards.iter().enumerate() {
            if by_id.insert(shard.id.clone(), idx).is_some() {
                return Err(RoutingError::configuration(format!(
                    "duplicate shard id '{}'",
                    shard.id
                )));
            }
        }
        let weights = WeightMap::build(shards.iter().map(|s| (s.id.clone(), s.weight)))
            .ok_or_else(|| RoutingError::configuration("total shard weight is zero"))?;
        Ok(Self {
            shards,
            by_id,
            weights,
        })
    }

    /// All shards in configuration order
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Shard by id
    pub fn get(&self, id: &ShardId) -> Option<&Shard> {
        self.by_id.get(id).map(|idx| &self.shards[*idx])
    }

    /// True if `id` is a registered shard
    pub fn contains(&self, id: &ShardId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Sum of all shard weights
    pub fn total_weight(&self) -> u64 {
        self.weights.total()
    }

    /// Weighted random shard
    pub fn random_shard(&self) -> ShardId {
        self.random_shard_with(&mut rand::thread_rng())
    }

    /// Weighted random shard drawn from `rng`
    pub fn random_shard_with<R: Rng + ?Sized>(&self, rng: &mut R) -> ShardId {
        self.weights.pick(rng).clone()
    }

    /// Weighted random shard outside `excluded`
    ///
    /// Returns `None` when every shard with non-zero weight is excluded.
    pub fn random_shard_except(&self, excluded: &[ShardId]) -> Option<ShardId> {
        self.random_shard_except_with(excluded, &mut rand::thread_rng())
    }

    /// [`random_shard_except`](Self::random_shard_except) drawing from `rng`
    pub fn random_shard_except_with<R: Rng + ?Sized>(
        &self,
        excluded: &[ShardId],
        rng: &mut R,
    ) -> Option<ShardId> {
        let excluded: HashSet<&ShardId> = excluded.iter().collect();
        let remaining = self
            .shards
            .iter()
            .filter(|s| !excluded.contains(&s.id))
            .map(|s| (&s.id, s.weight));
        WeightMap::build(remaining).map(|map| (*map.pick(rng)).clone())
    }
}
