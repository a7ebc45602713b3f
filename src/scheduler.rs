// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The batch-scheduler contract each [`crate::case::Partition`] is backed by.

use crate::{case::JobHandle, errors::StageError};

/// A batch scheduler backend for one partition (Slurm, PBS, a local fork
/// pool, ...).
///
/// The engine never queries job state on its own initiative; it only calls
/// `poll` once per drain tick, batched across every job currently queued or
/// running in this partition, and expects the scheduler to update whatever
/// side-channel the associated [`crate::pipeline::Pipeline`] reads from
/// `compile_complete`/`run_complete`.
pub trait Scheduler {
    /// Refreshes the status of the given jobs.
    ///
    /// Implementations should treat this as a single round-trip to the
    /// backend (one `squeue` invocation, one polling syscall, ...) rather
    /// than one call per job; the engine relies on batching here to keep
    /// drain ticks cheap regardless of how many tasks are in flight.
    fn poll(&mut self, jobs: &[JobHandle]) -> Result<(), StageError>;
}
