//! Fault injection for store operations
//!
//! # Fault Points
//!
//! Every store operation passes through one injection point:
//! - transaction begin, insert, commit
//! - committed reads (select, select-in)
//! - update and delete
//!
//! A point armed with `fail_next(point, n)` returns
//! `StoreError::Injected` for the next `n` operations at that point and
//! then behaves normally again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use keyroute_core::{StoreError, StoreResult};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Store operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Opening a transaction
    Begin,
    /// Inserting a row inside a transaction
    Insert,
    /// Committing a transaction
    Commit,
    /// Reading committed rows
    Select,
    /// Updating rows
    Update,
    /// Deleting rows
    Delete,
}

impl FaultPoint {
    /// Get all fault points
    pub fn all() -> Vec<FaultPoint> {
        vec![
            FaultPoint::Begin,
            FaultPoint::Insert,
            FaultPoint::Commit,
            FaultPoint::Select,
            FaultPoint::Update,
            FaultPoint::Delete,
        ]
    }
}

impl fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultPoint::Begin => "begin",
            FaultPoint::Insert => "insert",
            FaultPoint::Commit => "commit",
            FaultPoint::Select => "select",
            FaultPoint::Update => "update",
            FaultPoint::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Armed failures, shared by every operation of one store
#[derive(Debug, Default)]
pub struct FaultPlan {
    armed: Mutex<FxHashMap<FaultPoint, u32>>,
    fired: AtomicU64,
}

impl FaultPlan {
    /// Create a plan with nothing armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` operations at `point`
    ///
    /// Adds to whatever is already armed at that point.
    pub fn fail_next(&self, point: FaultPoint, times: u32) {
        let mut armed = self.armed.lock();
        *armed.entry(point).or_insert(0) += times;
    }

    /// Disarm every point
    pub fn clear(&self) {
        self.armed.lock().clear();
    }

    /// Remaining armed failures at `point`
    pub fn remaining(&self, point: FaultPoint) -> u32 {
        self.armed.lock().get(&point).copied().unwrap_or(0)
    }

    /// Total number of injected failures so far
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Consume one armed failure at `point`, if any
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Injected` when the point is armed.
    pub fn check(&self, point: FaultPoint) -> StoreResult<()> {
        let mut armed = self.armed.lock();
        match armed.get_mut(&point) {
            Some(left) if *left > 0 => {
                *left -= 1;
                if *left == 0 {
                    armed.remove(&point);
                }
                self.fired.fetch_add(1, Ordering::Relaxed);
                Err(StoreError::Injected(point.to_string()))
            }
            _ => Ok(()),
        }
    }
}
