//! Error types for keyroute
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! - `StoreError`: failures of the backing index-table store
//! - `ConfigError`: unreadable, unparsable or inconsistent configuration
//! - `RoutingError`: what the routing engine reports to its callers
//!
//! Store errors never cross the key-generator boundary: generators log them
//! and convert them into `RoutingError::ReservationFailed` or
//! `RoutingError::LookupFailed`. Only configuration problems are fatal.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::ShardId;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for routing operations
pub type RoutingResult<T> = std::result::Result<T, RoutingError>;

/// Errors raised by an index-table store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Table does not exist
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Table already exists
    #[error("Table already exists: {0}")]
    TableExists(String),

    /// Insert or update would duplicate a unique column value
    #[error("Unique constraint violated on {table}.{column}")]
    UniqueViolation {
        /// Table name
        table: String,
        /// Column carrying the constraint
        column: String,
    },

    /// Row is missing a required column or carries a malformed one
    #[error("Invalid row for table {table}: {reason}")]
    InvalidRow {
        /// Table name
        table: String,
        /// What is wrong with the row
        reason: String,
    },

    /// Transaction was already committed or rolled back
    #[error("Transaction {0} is closed")]
    TransactionClosed(u64),

    /// Failure injected by a test fault plan
    #[error("Injected fault at {0}")]
    Injected(String),

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Config text is not valid TOML for the expected schema
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// Config parsed but is inconsistent
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Errors reported by the routing engine
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Unknown record type, sharding type or generator; fatal
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A reservation could not be committed
    #[error("Reservation failed for {record_type}: {reason}")]
    ReservationFailed {
        /// Record type being reserved
        record_type: String,
        /// Short description of the failure
        reason: String,
    },

    /// A lookup hit a store failure (a missing key is not an error)
    #[error("Lookup failed for {record_type}: {reason}")]
    LookupFailed {
        /// Record type being looked up
        record_type: String,
        /// Short description of the failure
        reason: String,
    },

    /// The record type's key generator does not support the operation
    #[error("{operation} is not supported for {record_type}")]
    Unsupported {
        /// Record type
        record_type: String,
        /// Operation name
        operation: &'static str,
    },

    /// Shard id is not part of the registry
    #[error("Unknown shard: {0}")]
    UnknownShard(ShardId),
}

impl RoutingError {
    /// Build a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        RoutingError::Configuration(msg.into())
    }

    /// Build a reservation failure
    pub fn reservation_failed(record_type: &str, reason: impl ToString) -> Self {
        RoutingError::ReservationFailed {
            record_type: record_type.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Build a lookup failure
    pub fn lookup_failed(record_type: &str, reason: impl ToString) -> Self {
        RoutingError::LookupFailed {
            record_type: record_type.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that indicate broken configuration
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RoutingError::Configuration(_) | RoutingError::UnknownShard(_)
        )
    }
}

impl From<ConfigError> for RoutingError {
    fn from(e: ConfigError) -> Self {
        RoutingError::Configuration(e.to_string())
    }
}
