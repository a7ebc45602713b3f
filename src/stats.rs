// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Introspection snapshot of an [`crate::policy::asynchronous::AsyncDriver`].
//!
//! Grounded on the original policy's `countall` helper, which simply
//! totalled queue sizes across partitions for progress reporting. Folded
//! here into a richer snapshot so a caller can report progress without
//! reaching into the driver's internals.

use crate::case::PartitionId;
use indexmap::IndexMap;

/// A point-in-time snapshot of an asynchronous driver's bookkeeping.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EngineStats {
    /// Total number of cases submitted so far.
    pub submitted: usize,
    /// Number of tasks neither retired nor failed nor skipped.
    pub current: usize,
    /// Number of tasks in the retired list (including those still holding
    /// a non-zero `ref_count`).
    pub retired: usize,
    /// Number of tasks that reached [`crate::stage::Stage::Failed`].
    pub failed: usize,
    /// Number of tasks that reached [`crate::stage::Stage::Skipped`].
    pub skipped: usize,
    /// Current occupancy of the local queue.
    pub local_queue_len: usize,
    /// Current occupancy of each partition's queue, in the order
    /// partitions were first observed.
    pub partition_queue_lens: IndexMap<PartitionId, usize>,
}

impl EngineStats {
    /// Total number of jobs currently queued across the local queue and
    /// every partition queue — the direct analogue of the original
    /// `countall` helper.
    pub fn total_queued(&self) -> usize {
        self.local_queue_len + self.partition_queue_lens.values().sum::<usize>()
    }
}
