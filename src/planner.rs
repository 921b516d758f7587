//! Shard Planner
//!
//! The substrate's input layer cuts the unit file into map tasks by line
//! count. The planner picks that line count: the largest `S` in `[1, 30]`
//! that divides the unit count exactly, so no shard is a short remainder.
//!
//! This is a heuristic for uniform per-task running time, not a balanced
//! bin-packing: units differ wildly in cost (a 1-NN on a large dataset vs.
//! `ZeroR` on a small one), and a prime unit count degrades to one unit per
//! shard.

use crate::unit::WorkUnit;

/// Upper bound on units per shard
pub const MAX_SHARD_SIZE: usize = 30;

/// Largest divisor of `total_units` in `[1, MAX_SHARD_SIZE]`.
///
/// Zero units yields `MAX_SHARD_SIZE` (every candidate divides zero).
#[must_use]
pub fn shard_size(total_units: usize) -> usize {
    (1..=MAX_SHARD_SIZE)
        .rev()
        .find(|s| total_units % s == 0)
        .unwrap_or(1)
}

/// Units grouped into map tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan {
    shard_size: usize,
    shards: Vec<Vec<WorkUnit>>,
}

impl ShardPlan {
    /// Cut `units` into consecutive shards of [`shard_size`] units each,
    /// preserving generation order.
    #[must_use]
    pub fn new(units: &[WorkUnit]) -> Self {
        let shard_size = shard_size(units.len());
        let shards = units.chunks(shard_size).map(<[WorkUnit]>::to_vec).collect();
        Self { shard_size, shards }
    }

    /// Units per shard.
    #[must_use]
    pub const fn shard_size(&self) -> usize {
        self.shard_size
    }

    /// Number of shards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// True when there is nothing to dispatch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Shards in generation order.
    #[must_use]
    pub fn shards(&self) -> &[Vec<WorkUnit>] {
        &self.shards
    }
}
