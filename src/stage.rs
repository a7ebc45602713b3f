// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The pipeline stage a [`Task`](crate::task::Task) currently occupies.

use std::fmt;

/// A task's position in the setup → compile → run → finalize pipeline.
///
/// A task's stage only ever advances in one direction. [`Stage::Failed`],
/// [`Stage::Skipped`], and [`Stage::Retired`] are terminal: once reached,
/// no further advance call will move the task out of them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    /// Waiting on dependencies to resolve.
    Waiting,
    /// Dependencies resolved; waiting for admission to a compile queue.
    ReadyToCompile,
    /// `compile()` has been invoked; waiting for `compile_complete()`.
    Compiling,
    /// Compilation finished; waiting for admission to a run queue.
    ReadyToRun,
    /// `run()` has been invoked; waiting for `run_complete()`.
    Running,
    /// Run finished; sanity/performance/finalize remain.
    Completed,
    /// Finalized and appended to the retired list. Terminal, success.
    Retired,
    /// A stage raised, or a dependency failed. Terminal, failure.
    Failed,
    /// A dependency was skipped. Terminal, not counted as a failure.
    Skipped,
}

impl Stage {
    /// True for `Failed`, `Skipped`, and `Retired` — stages a task never
    /// leaves once reached.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Failed | Stage::Skipped | Stage::Retired)
    }

    /// True while a task's compile or run job may be sitting in a queue
    /// awaiting a scheduler poll.
    pub fn is_polling(self) -> bool {
        matches!(self, Stage::Compiling | Stage::Running)
    }

    /// The name reported in [`crate::task::Task::failed_stage`] when a
    /// stage call made during this stage fails. Distinct from `Debug` so
    /// that renames of the enum variants don't silently change reported
    /// stage names.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Waiting => "waiting",
            Stage::ReadyToCompile => "ready_to_compile",
            Stage::Compiling => "compiling",
            Stage::ReadyToRun => "ready_to_run",
            Stage::Running => "running",
            Stage::Completed => "completed",
            Stage::Retired => "retired",
            Stage::Failed => "failed",
            Stage::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
