//! Value types for keyroute
//!
//! This module defines:
//! - Value: the column value model of index rows and record fields
//! - ShardKey: a business key or record identifier used for routing
//! - KeyKind: discriminates numeric keys from text keys
//!
//! ## Value Model
//!
//! Index tables only ever hold identifiers, shard names and a handful of
//! denormalized scalar fields, so the model is restricted to four variants:
//! `Null`, `Bool`, `Int`, `String`. Keeping floats out lets `Value` be
//! `Eq + Hash + Ord`, which the batched lookups rely on for grouping.
//!
//! Different types are NEVER equal: `Int(1) != String("1")`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Column value of an index row or record field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value (missing field, SQL NULL)
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// UTF-8 string
    String(String),
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::String(_) => "String",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for `Null` and for the empty string
    ///
    /// Routing treats both as "no key supplied".
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Get as i64 if this is an Int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as bool if this is a Bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as &str if this is a String
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Kind of a routing key, used to pick a bucket mapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Integer keys (auto ids, numeric business keys)
    Numeric,
    /// Text keys (emails, slugs, external ids)
    Text,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Numeric => write!(f, "numeric"),
            KeyKind::Text => write!(f, "text"),
        }
    }
}

/// Business key or record identifier
///
/// Only integers and non-empty strings can route a record. Conversion
/// from [`Value`] rejects everything else, so a `ShardKey` in hand is
/// always a usable key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShardKey {
    /// Integer key
    Int(i64),
    /// Text key
    Text(String),
}

impl ShardKey {
    /// Convert a column value into a key
    ///
    /// Returns None for `Null`, `Bool` and the empty string.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(ShardKey::Int(*i)),
            Value::String(s) if !s.is_empty() => Some(ShardKey::Text(s.clone())),
            _ => None,
        }
    }

    /// Convert back into a column value
    pub fn to_value(&self) -> Value {
        match self {
            ShardKey::Int(i) => Value::Int(*i),
            ShardKey::Text(s) => Value::String(s.clone()),
        }
    }

    /// Numeric or text
    pub fn kind(&self) -> KeyKind {
        match self {
            ShardKey::Int(_) => KeyKind::Numeric,
            ShardKey::Text(_) => KeyKind::Text,
        }
    }

    /// This key as a key of `kind`
    ///
    /// Text holding a decimal integer converts to `Int`; integers convert
    /// to their decimal text. None when no conversion exists.
    pub fn coerce(&self, kind: KeyKind) -> Option<ShardKey> {
        match (self, kind) {
            (ShardKey::Int(_), KeyKind::Numeric) | (ShardKey::Text(_), KeyKind::Text) => {
                Some(self.clone())
            }
            (ShardKey::Text(s), KeyKind::Numeric) => s.parse().ok().map(ShardKey::Int),
            (ShardKey::Int(i), KeyKind::Text) => Some(ShardKey::Text(i.to_string())),
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardKey::Int(i) => write!(f, "{}", i),
            ShardKey::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for ShardKey {
    fn from(i: i64) -> Self {
        ShardKey::Int(i)
    }
}

impl From<&str> for ShardKey {
    fn from(s: &str) -> Self {
        ShardKey::Text(s.to_string())
    }
}

impl From<String> for ShardKey {
    fn from(s: String) -> Self {
        ShardKey::Text(s)
    }
}
