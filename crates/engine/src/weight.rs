//! Cumulative-weight table for weighted random shard selection
//!
//! Shard `i` owns the half-open slot range
//! `[cumulative[i] - weight[i], cumulative[i])` of `0..total`. A uniform
//! point in `0..total` is resolved with a binary search, so shard `i` is
//! picked with probability exactly `weight[i] / total` and memory stays
//! O(shards) whatever the weights are.
//!
//! Zero-weight shards own an empty range and are never picked.

use rand::Rng;

/// Immutable weighted choice over a list of items
#[derive(Debug, Clone)]
pub struct WeightMap<T> {
    items: Vec<T>,
    /// Running sum of weights; `cumulative[i]` is the exclusive end of
    /// item `i`'s slot range
    cumulative: Vec<u64>,
}

impl<T> WeightMap<T> {
    /// Build a map from `(item, weight)` pairs
    ///
    /// Zero-weight items are dropped. Returns `None` when the total weight
    /// is zero, since nothing could ever be picked.
    pub fn build(weighted: impl IntoIterator<Item = (T, u32)>) -> Option<Self> {
        let mut items = Vec::new();
        let mut cumulative = Vec::new();
        let mut total = 0u64;
        for (item, weight) in weighted {
            if weight == 0 {
                continue;
            }
            total += u64::from(weight);
            items.push(item);
            cumulative.push(total);
        }
        if total == 0 {
            return None;
        }
        Some(Self { items, cumulative })
    }

    /// Sum of all weights
    pub fn total(&self) -> u64 {
        self.cumulative.last().copied().unwrap_or(0)
    }

    /// Number of pickable items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always false for a built map; kept for API symmetry
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item owning `point`, for `point` in `0..total()`
    ///
    /// Points past the end resolve to the last item.
    pub fn slot(&self, point: u64) -> &T {
        let idx = self.cumulative.partition_point(|&end| end <= point);
        &self.items[idx.min(self.items.len() - 1)]
    }

    /// Pick an item with probability proportional to its weight
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &T {
        self.slot(rng.gen_range(0..self.total()))
    }

    /// Items in table order
    pub fn items(&self) -> &[T] {
        &self.items
    }
}
