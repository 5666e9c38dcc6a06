//! Bucket mappers
//!
//! A bucket mapper is a pure function from a shard key to a virtual
//! bucket id. One mapper exists per key kind:
//!
//! | spec                   | kind    | bucket                          |
//! |------------------------|---------|---------------------------------|
//! | `range { bucket_size }`| numeric | `value / bucket_size + 1`       |
//! | `modulo { buckets }`   | numeric | `value mod buckets`             |
//! | `hash { buckets }`     | text    | `xxh3_64(utf8) mod buckets`     |
//!
//! Keys a mapper cannot place (wrong kind, negative range keys, empty
//! text) map to `None`.

use keyroute_core::{BucketId, KeyKind, MapperSpec, ShardKey};
use once_cell::sync::OnceCell;
use xxhash_rust::xxh3::xxh3_64;

/// Maps keys of one kind to virtual buckets
pub trait BucketMapper: Send + Sync + std::fmt::Debug {
    /// Key kind this mapper accepts
    fn kind(&self) -> KeyKind;

    /// Bucket of `key`, or None if the key cannot be placed
    fn map(&self, key: &ShardKey) -> Option<BucketId>;
}

/// Consecutive integer ranges of `bucket_size` keys
#[derive(Debug, Clone, Copy)]
pub struct RangeMapper {
    bucket_size: u64,
}

impl RangeMapper {
    /// Create a range mapper; `bucket_size` must be non-zero
    pub fn new(bucket_size: u64) -> Self {
        Self {
            bucket_size: bucket_size.max(1),
        }
    }
}

impl BucketMapper for RangeMapper {
    fn kind(&self) -> KeyKind {
        KeyKind::Numeric
    }

    fn map(&self, key: &ShardKey) -> Option<BucketId> {
        match key {
            ShardKey::Int(v) if *v >= 0 => {
                let bucket = *v as u64 / self.bucket_size + 1;
                // bucket ids are stored as i64
                (bucket <= i64::MAX as u64).then_some(BucketId(bucket))
            }
            _ => None,
        }
    }
}

/// Integer modulo a fixed bucket count
#[derive(Debug, Clone, Copy)]
pub struct ModuloMapper {
    buckets: u64,
}

impl ModuloMapper {
    /// Create a modulo mapper; `buckets` must be non-zero
    pub fn new(buckets: u64) -> Self {
        Self {
            buckets: buckets.max(1),
        }
    }
}

impl BucketMapper for ModuloMapper {
    fn kind(&self) -> KeyKind {
        KeyKind::Numeric
    }

    fn map(&self, key: &ShardKey) -> Option<BucketId> {
        match key {
            // buckets <= i64::MAX is enforced by config validation
            ShardKey::Int(v) => {
                let buckets = i64::try_from(self.buckets).ok()?;
                Some(BucketId(v.rem_euclid(buckets) as u64))
            }
            ShardKey::Text(_) => None,
        }
    }
}

/// xxh3 hash of the UTF-8 text modulo a fixed bucket count
#[derive(Debug, Clone, Copy)]
pub struct HashMapper {
    buckets: u64,
}

impl HashMapper {
    /// Create a hash mapper; `buckets` must be non-zero
    pub fn new(buckets: u64) -> Self {
        Self {
            buckets: buckets.max(1),
        }
    }
}

impl BucketMapper for HashMapper {
    fn kind(&self) -> KeyKind {
        KeyKind::Text
    }

    fn map(&self, key: &ShardKey) -> Option<BucketId> {
        match key {
            ShardKey::Text(s) if !s.is_empty() => Some(BucketId(xxh3_64(s.as_bytes()) % self.buckets)),
            _ => None,
        }
    }
}

/// Instantiate the mapper described by `spec`
pub fn build_mapper(spec: &MapperSpec) -> Box<dyn BucketMapper> {
    match *spec {
        MapperSpec::Range { bucket_size } => Box::new(RangeMapper::new(bucket_size)),
        MapperSpec::Modulo { buckets } => Box::new(ModuloMapper::new(buckets)),
        MapperSpec::Hash { buckets } => Box::new(HashMapper::new(buckets)),
    }
}

/// The numeric and text mapper of one generator, created on first use
#[derive(Debug)]
pub struct MapperSet {
    numeric_spec: MapperSpec,
    text_spec: MapperSpec,
    numeric: OnceCell<Box<dyn BucketMapper>>,
    text: OnceCell<Box<dyn BucketMapper>>,
}

impl MapperSet {
    /// Lazy set over the two specs
    pub fn new(numeric_spec: MapperSpec, text_spec: MapperSpec) -> Self {
        Self {
            numeric_spec,
            text_spec,
            numeric: OnceCell::new(),
            text: OnceCell::new(),
        }
    }

    /// Mapper for keys of `kind`
    pub fn for_kind(&self, kind: KeyKind) -> &dyn BucketMapper {
        let mapper = match kind {
            KeyKind::Numeric => self.numeric.get_or_init(|| build_mapper(&self.numeric_spec)),
            KeyKind::Text => self.text.get_or_init(|| build_mapper(&self.text_spec)),
        };
        mapper.as_ref()
    }

    /// Bucket of `key` using the mapper for `kind`
    ///
    /// `kind` is the declared kind of the mapping field. The key is
    /// converted to it first; a key that does not convert maps nowhere.
    pub fn bucket(&self, kind: KeyKind, key: &ShardKey) -> Option<BucketId> {
        let key = key.coerce(kind)?;
        self.for_kind(kind).map(&key)
    }

    /// True once the mapper for `kind` has been created
    pub fn is_initialized(&self, kind: KeyKind) -> bool {
        match kind {
            KeyKind::Numeric => self.numeric.get().is_some(),
            KeyKind::Text => self.text.get().is_some(),
        }
    }
}
