//! Testing utilities for index-store failure handling
//!
//! This module provides tools for exercising the routing engine's
//! rollback and retry paths:
//!
//! - **Fault plan**: arm a store operation to fail the next N times
//!
//! # Example
//!
//! ```
//! use keyroute_storage::testing::FaultPoint;
//! use keyroute_storage::MemoryIndexStore;
//!
//! let store = MemoryIndexStore::new();
//! // the next two inserts fail, then inserts succeed again
//! store.faults().fail_next(FaultPoint::Insert, 2);
//! ```

mod faults;

pub use faults::{FaultPlan, FaultPoint};
