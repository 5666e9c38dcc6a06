//! Routing configuration
//!
//! Shards, sharding types and per-record-type sharding settings are static
//! for the lifetime of a process. They are parsed once (from TOML or built
//! in code), validated once, and then handed to the orchestrator as
//! explicit value types.
//!
//! # Example
//!
//! ```toml
//! [[shards]]
//! id = "s1"
//! weight = 1
//! connection = "postgres://shard1/app"
//!
//! [[shards]]
//! id = "s2"
//! weight = 3
//!
//! [objects.user]
//! sharding_type = "user_key"
//! sharding_key = "user_id"
//! index_object = "user_index"
//! indexed_fields = [{ name = "email", kind = "text" }]
//!
//! [[routes]]
//! object = "user"
//! field = "region"
//! value = "eu"
//! shard = "s1"
//! ```
//!
//! The four built-in sharding types `global_id`, `user_key`,
//! `user_key_no_index` and `virtual_bucket` are always available. Entries
//! under `[sharding_types]` are added to them, and an entry reusing a
//! built-in name replaces that built-in.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use crate::error::ConfigError;
use crate::types::{Shard, ShardId};
use crate::value::{KeyKind, Value};

/// Generator tag: central auto-increment index
pub const GLOBAL_INDEX: &str = "global_index";
/// Generator tag: business key plus auto id in the index table
pub const USER_KEY: &str = "user_key";
/// Generator tag: business key is the index table key
pub const USER_KEY_NO_INDEX: &str = "user_key_no_index";
/// Generator tag: business key mapped through virtual buckets
pub const VIRTUAL_BUCKET: &str = "virtual_bucket";

/// Default shard column of index tables
pub const DEFAULT_SHARD_FIELD: &str = "shard";
/// Default bucket column of bucket index tables
pub const DEFAULT_BUCKET_FIELD: &str = "bucket";
/// Default primary key column
pub const DEFAULT_PRIMARY_KEY: &str = "id";

fn default_shard_field() -> String {
    DEFAULT_SHARD_FIELD.to_string()
}

fn default_bucket_field() -> String {
    DEFAULT_BUCKET_FIELD.to_string()
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

fn default_numeric_mapper() -> MapperSpec {
    MapperSpec::Range { bucket_size: 20_000 }
}

fn default_text_mapper() -> MapperSpec {
    MapperSpec::Hash { buckets: 4096 }
}

/// How a bucket mapper turns a key into a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MapperSpec {
    /// Consecutive integer ranges: `value / bucket_size + 1`
    Range {
        /// Keys per bucket
        bucket_size: u64,
    },
    /// Integer modulo: `value mod buckets`
    Modulo {
        /// Number of buckets
        buckets: u64,
    },
    /// Text hash: `xxh3(text) mod buckets`
    Hash {
        /// Number of buckets
        buckets: u64,
    },
}

impl MapperSpec {
    /// Key kind the mapper accepts
    pub fn key_kind(&self) -> KeyKind {
        match self {
            MapperSpec::Range { .. } | MapperSpec::Modulo { .. } => KeyKind::Numeric,
            MapperSpec::Hash { .. } => KeyKind::Text,
        }
    }

    fn size(&self) -> u64 {
        match self {
            MapperSpec::Range { bucket_size } => *bucket_size,
            MapperSpec::Modulo { buckets } | MapperSpec::Hash { buckets } => *buckets,
        }
    }
}

/// Options passed to a key generator factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorOptions {
    /// Index-table column holding the shard id
    #[serde(default = "default_shard_field")]
    pub shard_field: String,
    /// Index-table column holding the bucket id (bucket generators)
    #[serde(default = "default_bucket_field")]
    pub bucket_field: String,
    /// Mapper for integer keys (bucket generators)
    #[serde(default = "default_numeric_mapper")]
    pub numeric_mapper: MapperSpec,
    /// Mapper for text keys (bucket generators)
    #[serde(default = "default_text_mapper")]
    pub text_mapper: MapperSpec,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            shard_field: default_shard_field(),
            bucket_field: default_bucket_field(),
            numeric_mapper: default_numeric_mapper(),
            text_mapper: default_text_mapper(),
        }
    }
}

/// A sharding type: which generator to run and with which options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingTypeConfig {
    /// Registered generator tag
    pub generator: String,
    /// Generator options
    #[serde(default)]
    pub options: GeneratorOptions,
}

impl ShardingTypeConfig {
    /// Sharding type running `generator` with default options
    pub fn new(generator: impl Into<String>) -> Self {
        Self {
            generator: generator.into(),
            options: GeneratorOptions::default(),
        }
    }
}

/// The built-in sharding types
pub fn default_sharding_types() -> BTreeMap<String, ShardingTypeConfig> {
    [
        ("global_id", GLOBAL_INDEX),
        ("user_key", USER_KEY),
        ("user_key_no_index", USER_KEY_NO_INDEX),
        ("virtual_bucket", VIRTUAL_BUCKET),
    ]
    .into_iter()
    .map(|(name, tag)| (name.to_string(), ShardingTypeConfig::new(tag)))
    .collect()
}

fn merge_sharding_types<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, ShardingTypeConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let custom = BTreeMap::<String, ShardingTypeConfig>::deserialize(deserializer)?;
    let mut types = default_sharding_types();
    types.extend(custom);
    Ok(types)
}

/// Declared type of a denormalized index field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Integer column
    Int,
    /// Text column
    Text,
    /// Boolean column
    Bool,
}

impl FieldKind {
    /// True if `value` fits this kind; Null fits every kind
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (FieldKind::Int, Value::Int(_))
                | (FieldKind::Text, Value::String(_))
                | (FieldKind::Bool, Value::Bool(_))
        )
    }

    /// Key kind of values of this field; None for `Bool`
    pub fn key_kind(&self) -> Option<KeyKind> {
        match self {
            FieldKind::Int => Some(KeyKind::Numeric),
            FieldKind::Text => Some(KeyKind::Text),
            FieldKind::Bool => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Int => write!(f, "int"),
            FieldKind::Text => write!(f, "text"),
            FieldKind::Bool => write!(f, "bool"),
        }
    }
}

/// A record field copied into the index table on reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFieldSpec {
    /// Field name (same name in the record and the index table)
    pub name: String,
    /// Declared type
    pub kind: FieldKind,
}

impl IndexFieldSpec {
    /// Create a field spec
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Sharding settings of one distributed record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// Name of a configured sharding type
    pub sharding_type: String,
    /// Business-key field (user-key generators)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharding_key: Option<String>,
    /// Field fed to the bucket mapper (bucket generators)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_mapper_key: Option<String>,
    /// Declared kind of the bucket mapper field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_key_kind: Option<FieldKind>,
    /// Index table name
    pub index_object: String,
    /// Primary key field of the record type
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Fields denormalized into the index table
    #[serde(default)]
    pub indexed_fields: Vec<IndexFieldSpec>,
}

impl ShardingConfig {
    /// Config for `sharding_type` indexed in `index_object`
    pub fn new(sharding_type: impl Into<String>, index_object: impl Into<String>) -> Self {
        Self {
            sharding_type: sharding_type.into(),
            sharding_key: None,
            bucket_mapper_key: None,
            bucket_key_kind: None,
            index_object: index_object.into(),
            primary_key: default_primary_key(),
            indexed_fields: Vec::new(),
        }
    }

    /// Set the business-key field
    pub fn with_sharding_key(mut self, field: impl Into<String>) -> Self {
        self.sharding_key = Some(field.into());
        self
    }

    /// Set the bucket mapper field and its declared kind
    pub fn with_bucket_mapper_key(mut self, field: impl Into<String>, kind: FieldKind) -> Self {
        self.bucket_mapper_key = Some(field.into());
        self.bucket_key_kind = Some(kind);
        self
    }

    /// Declared kind of the bucket mapper field
    ///
    /// Taken from `bucket_key_kind`, else from the indexed field of the
    /// same name. A mapping field that is the primary key defaults to
    /// `Int`. None when no mapping field is set or its kind is unknown.
    pub fn mapping_field_kind(&self) -> Option<FieldKind> {
        let field = self.bucket_mapper_key.as_deref()?;
        self.bucket_key_kind
            .or_else(|| {
                self.indexed_fields
                    .iter()
                    .find(|f| f.name == field)
                    .map(|f| f.kind)
            })
            .or_else(|| (field == self.primary_key).then_some(FieldKind::Int))
    }

    /// Set the primary key field
    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = field.into();
        self
    }

    /// Add a denormalized index field
    pub fn with_indexed_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.indexed_fields.push(IndexFieldSpec::new(name, kind));
        self
    }
}

/// Explicit routing rule: records whose `field` equals `value` go to `shard`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Record type the rule applies to
    pub object: String,
    /// Record field to inspect
    pub field: String,
    /// Value that triggers the rule
    pub value: Value,
    /// Target shard
    pub shard: ShardId,
}

/// Complete routing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Shard registry
    pub shards: Vec<Shard>,
    /// Sharding type name -> generator
    #[serde(default = "default_sharding_types", deserialize_with = "merge_sharding_types")]
    pub sharding_types: BTreeMap<String, ShardingTypeConfig>,
    /// Record type name -> sharding settings
    #[serde(default)]
    pub objects: BTreeMap<String, ShardingConfig>,
    /// Explicit routing rules
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

impl RoutingConfig {
    /// Config with the given shards, built-in sharding types and no objects
    pub fn new(shards: Vec<Shard>) -> Self {
        Self {
            shards,
            sharding_types: default_sharding_types(),
            objects: BTreeMap::new(),
            routes: Vec::new(),
        }
    }

    /// Register a distributed record type
    pub fn with_object(mut self, record_type: impl Into<String>, config: ShardingConfig) -> Self {
        self.objects.insert(record_type.into(), config);
        self
    }

    /// Register or replace a sharding type
    pub fn with_sharding_type(
        mut self,
        name: impl Into<String>,
        config: ShardingTypeConfig,
    ) -> Self {
        self.sharding_types.insert(name.into(), config);
        self
    }

    /// Add an explicit routing rule
    pub fn with_route(mut self, route: RouteSpec) -> Self {
        self.routes.push(route);
        self
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema or
    /// fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RoutingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check internal consistency
    ///
    /// Generator-specific requirements (for example that a user-key type
    /// names its business-key field) are checked by the generators when
    /// the orchestrator is built.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_shards()?;
        self.validate_sharding_types()?;
        self.validate_objects()?;
        self.validate_routes()
    }

    fn validate_shards(&self) -> Result<(), ConfigError> {
        if self.shards.is_empty() {
            return Err(invalid("no shards configured"));
        }
        let mut seen = HashSet::new();
        for shard in &self.shards {
            if shard.id.as_str().is_empty() {
                return Err(invalid("shard id must not be empty"));
            }
            if !seen.insert(&shard.id) {
                return Err(invalid(format!("duplicate shard id '{}'", shard.id)));
            }
        }
        let total: u64 = self.shards.iter().map(|s| u64::from(s.weight)).sum();
        if total == 0 {
            return Err(invalid("total shard weight must be greater than zero"));
        }
        Ok(())
    }

    fn validate_sharding_types(&self) -> Result<(), ConfigError> {
        for (name, sharding_type) in &self.sharding_types {
            if sharding_type.generator.is_empty() {
                return Err(invalid(format!("sharding type '{}' has no generator", name)));
            }
            let options = &sharding_type.options;
            if options.shard_field.is_empty() || options.bucket_field.is_empty() {
                return Err(invalid(format!(
                    "sharding type '{}' has an empty shard or bucket field",
                    name
                )));
            }
            if options.shard_field == options.bucket_field {
                return Err(invalid(format!(
                    "sharding type '{}' uses '{}' as both shard and bucket field",
                    name, options.shard_field
                )));
            }
            check_mapper(name, &options.numeric_mapper, KeyKind::Numeric)?;
            check_mapper(name, &options.text_mapper, KeyKind::Text)?;
        }
        Ok(())
    }

    fn validate_objects(&self) -> Result<(), ConfigError> {
        let mut tables = HashSet::new();
        for (record_type, object) in &self.objects {
            if !self.sharding_types.contains_key(&object.sharding_type) {
                return Err(invalid(format!(
                    "object '{}' uses unknown sharding type '{}'",
                    record_type, object.sharding_type
                )));
            }
            if object.index_object.is_empty() {
                return Err(invalid(format!("object '{}' has no index object", record_type)));
            }
            if !tables.insert(object.index_object.as_str()) {
                return Err(invalid(format!(
                    "index object '{}' is shared by more than one record type",
                    object.index_object
                )));
            }
            if object.primary_key.is_empty() {
                return Err(invalid(format!("object '{}' has an empty primary key", record_type)));
            }
            let named_fields = [&object.sharding_key, &object.bucket_mapper_key];
            if named_fields.iter().any(|f| f.as_deref() == Some("")) {
                return Err(invalid(format!(
                    "object '{}' names an empty sharding or bucket field",
                    record_type
                )));
            }
            let mut fields = HashSet::new();
            for field in &object.indexed_fields {
                if field.name.is_empty() || !fields.insert(field.name.as_str()) {
                    return Err(invalid(format!(
                        "object '{}' has an empty or duplicate indexed field '{}'",
                        record_type, field.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_routes(&self) -> Result<(), ConfigError> {
        for route in &self.routes {
            if !self.objects.contains_key(&route.object) {
                return Err(invalid(format!(
                    "route targets unknown object '{}'",
                    route.object
                )));
            }
            if !self.shards.iter().any(|s| s.id == route.shard) {
                return Err(invalid(format!(
                    "route for '{}' targets unknown shard '{}'",
                    route.object, route.shard
                )));
            }
        }
        Ok(())
    }
}

fn check_mapper(sharding_type: &str, spec: &MapperSpec, expected: KeyKind) -> Result<(), ConfigError> {
    if spec.key_kind() != expected {
        return Err(invalid(format!(
            "sharding type '{}' configures a {} mapper in the {} slot",
            sharding_type,
            spec.key_kind(),
            expected
        )));
    }
    if spec.size() == 0 {
        return Err(invalid(format!(
            "sharding type '{}' configures a {} mapper of size zero",
            sharding_type, expected
        )));
    }
    if i64::try_from(spec.size()).is_err() {
        return Err(invalid(format!(
            "sharding type '{}' configures a {} mapper larger than i64::MAX",
            sharding_type, expected
        )));
    }
    Ok(())
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
