// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-case stage contract a [`crate::task::Task`] drives through.

use crate::{
    case::{JobHandle, SchedOptions},
    errors::StageError,
};

/// Whether a just-invoked stage call completed synchronously or is now
/// pending a scheduler poll.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StageOutcome {
    /// The stage finished; the task may advance immediately.
    Done,
    /// The stage submitted a job; the task should wait on the returned
    /// handle via the owning partition's scheduler.
    Pending(JobHandle),
}

/// Result type every [`Pipeline`] stage method returns.
pub type StageResult<T> = Result<T, StageError>;

/// The setup → compile → run → sanity → performance → finalize → cleanup
/// pipeline for a single case.
///
/// Implementations wrap whatever actually builds and runs the check: a
/// local subprocess, a container, a remote job submission. The engine
/// drives the state machine; this trait supplies the state transitions.
///
/// Every method defaults to a synchronous no-op success except the two
/// that may hand off to a scheduler (`compile`, `run`); this lets a
/// pipeline that has no meaningful sanity/performance/cleanup phase (e.g.
/// a `compile_only` or `run_only` case) opt out without boilerplate.
pub trait Pipeline {
    /// Runs any local setup: resolving the environment, staging files.
    ///
    /// `sched_options` is [`crate::config::DriverConfig::sched_options`],
    /// forwarded verbatim so a pipeline that submits its own scheduler job
    /// (rather than going through `compile`/`run`'s `Pending` handle) can
    /// honor the same flex-node-allocation/extra-argument overrides the
    /// engine's own queues do.
    fn setup(&mut self, sched_options: &SchedOptions) -> StageResult<()> {
        let _ = sched_options;
        Ok(())
    }

    /// Starts compiling the check. `Pending` means a job handle was
    /// submitted to the owning partition's scheduler; the task stays in
    /// [`crate::stage::Stage::Compiling`] until `compile_complete` reports
    /// it finished.
    fn compile(&mut self) -> StageResult<StageOutcome> {
        Ok(StageOutcome::Done)
    }

    /// True once the job submitted by `compile` has finished, per the
    /// partition scheduler's most recent poll.
    fn compile_complete(&mut self) -> StageResult<bool> {
        Ok(true)
    }

    /// Starts running the check. Same `Pending`/`Done` contract as
    /// `compile`.
    fn run(&mut self) -> StageResult<StageOutcome> {
        Ok(StageOutcome::Done)
    }

    /// True once the job submitted by `run` has finished.
    fn run_complete(&mut self) -> StageResult<bool> {
        Ok(true)
    }

    /// Validates output correctness. Returning `Err` fails the task.
    fn sanity(&mut self) -> StageResult<()> {
        Ok(())
    }

    /// Extracts and checks performance figures. Returning `Err` fails the
    /// task; a pipeline with no performance checks should leave this as
    /// the default no-op.
    fn performance(&mut self) -> StageResult<()> {
        Ok(())
    }

    /// Records the case as retired: writes reports, archives artifacts.
    /// Invoked once, after `performance` succeeds.
    fn finalize(&mut self) -> StageResult<()> {
        Ok(())
    }

    /// Removes any stage directory or other scratch state. Invoked once a
    /// retired task's `ref_count` reaches zero, and again for a task that
    /// fails before retiring. `keep_files` is the negation of
    /// [`crate::config::DriverConfig::keep_stage_files`].
    fn cleanup(&mut self, keep_files: bool) -> StageResult<()> {
        let _ = keep_files;
        Ok(())
    }

    /// True if this case runs entirely on the driver host rather than
    /// through a partition's batch scheduler. Affects queue placement for
    /// both `compile` and `run`.
    fn local(&self) -> bool {
        false
    }

    /// True if compilation specifically runs on the driver host, even
    /// though `run` goes through the partition scheduler. Affects queue
    /// placement for `compile` only — this asymmetry with `local` is
    /// deliberate.
    fn build_locally(&self) -> bool {
        false
    }

    /// True if this case only needs to compile; `run`/`sanity`/
    /// `performance` are skipped once `compile_complete` reports done.
    fn compile_only(&self) -> bool {
        false
    }

    /// True if this case has nothing to compile; `compile`/
    /// `compile_complete` are skipped and the task proceeds straight to
    /// `run`.
    fn run_only(&self) -> bool {
        false
    }
}
