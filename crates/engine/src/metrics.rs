//! Routing metrics
//!
//! Counters use Relaxed ordering: they are observational only and do not
//! synchronize any other memory operation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the orchestrator and its generators
#[derive(Debug, Default)]
pub struct RoutingMetrics {
    reservations: AtomicU64,
    reservation_failures: AtomicU64,
    retries: AtomicU64,
    lookups: AtomicU64,
    lookup_misses: AtomicU64,
    deletes: AtomicU64,
    random_assignments: AtomicU64,
}

impl RoutingMetrics {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// A reservation committed (or found an existing mapping)
    pub fn record_reservation(&self) {
        self.reservations.fetch_add(1, Ordering::Relaxed);
    }

    /// A reservation failed for good
    pub fn record_reservation_failure(&self) {
        self.reservation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A user-key reservation is being retried
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// `keys` keys were looked up, `misses` of them had no mapping
    pub fn record_lookup(&self, keys: u64, misses: u64) {
        self.lookups.fetch_add(keys, Ordering::Relaxed);
        self.lookup_misses.fetch_add(misses, Ordering::Relaxed);
    }

    /// An index entry was deleted
    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// A new record was placed by weighted random choice
    pub fn record_random_assignment(&self) {
        self.random_assignments.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reservations: self.reservations.load(Ordering::Relaxed),
            reservation_failures: self.reservation_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            lookup_misses: self.lookup_misses.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            random_assignments: self.random_assignments.load(Ordering::Relaxed),
        }
    }
}

/// Routing metrics
///
/// Provides statistics about reservations and lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Successful reservations
    pub reservations: u64,
    /// Reservations that failed after all attempts
    pub reservation_failures: u64,
    /// User-key retries
    pub retries: u64,
    /// Keys looked up (single and batched)
    pub lookups: u64,
    /// Looked-up keys with no mapping
    pub lookup_misses: u64,
    /// Deleted index entries
    pub deletes: u64,
    /// Placements made by weighted random choice
    pub random_assignments: u64,
}

impl MetricsSnapshot {
    /// Fraction of looked-up keys that had a mapping
    pub fn hit_rate(&self) -> f64 {
        if self.lookups > 0 {
            (self.lookups - self.lookup_misses) as f64 / self.lookups as f64
        } else {
            0.0
        }
    }
}
