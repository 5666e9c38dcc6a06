//! Explicit routing rules
//!
//! A [`Router`] gets a chance to place a new record before the weighted
//! random fallback. It is only consulted for record types it claims via
//! [`Router::has_routes`], and only when the key generator did not already
//! detect an existing mapping.

use keyroute_core::{Record, RouteSpec, RoutingConfig, ShardId, Value};
use rustc_hash::FxHashMap;

/// Optional placement hook consulted during reservation
pub trait Router: Send + Sync {
    /// True if this router has any rule for `record_type`
    fn has_routes(&self, record_type: &str) -> bool;

    /// Shard chosen for `record`, or None to fall back to random placement
    fn find_shard(&self, record: &dyn Record) -> Option<ShardId>;
}

#[derive(Debug, Clone)]
struct FieldRule {
    field: String,
    value: Value,
    shard: ShardId,
}

/// Router driven by `(record type, field, value) -> shard` rules
///
/// Rules of one record type are tried in insertion order; the first rule
/// whose field holds the rule's value wins.
#[derive(Debug, Clone, Default)]
pub struct FieldRouter {
    rules: FxHashMap<String, Vec<FieldRule>>,
}

impl FieldRouter {
    /// Router with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Router holding every rule of `config.routes`
    pub fn from_config(config: &RoutingConfig) -> Self {
        config
            .routes
            .iter()
            .cloned()
            .fold(Self::new(), FieldRouter::with_route)
    }

    /// Add a rule
    pub fn with_route(mut self, route: RouteSpec) -> Self {
        self.rules.entry(route.object).or_default().push(FieldRule {
            field: route.field,
            value: route.value,
            shard: route.shard,
        });
        self
    }

    /// Every shard some rule can return
    pub fn target_shards(&self) -> impl Iterator<Item = &ShardId> {
        self.rules.values().flatten().map(|rule| &rule.shard)
    }

    /// True if no rule is registered
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Router for FieldRouter {
    fn has_routes(&self, record_type: &str) -> bool {
        self.rules.contains_key(record_type)
    }

    fn find_shard(&self, record: &dyn Record) -> Option<ShardId> {
        self.rules
            .get(record.name())?
            .iter()
            .find(|rule| record.get(&rule.field).as_ref() == Some(&rule.value))
            .map(|rule| rule.shard.clone())
    }
}
