// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types produced by the engine and its collaborators.
//!
//! Each surface gets its own error type rather than one catch-all enum, so
//! callers can match on exactly the failure modes relevant to the API they
//! called.

use std::fmt;
use thiserror::Error;

/// An error raised by a [`crate::pipeline::Pipeline`] or
/// [`crate::scheduler::Scheduler`] call made while advancing a task.
///
/// Carries no task identity of its own; the engine attaches that
/// (`failed_stage`, the task key) when it records the failure onto the
/// task.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StageError {
    message: String,
    skip: bool,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl StageError {
    /// Creates a stage error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            skip: false,
            source: None,
        }
    }

    /// Wraps an arbitrary error as a stage error.
    pub fn from_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            skip: false,
            source: Some(Box::new(source)),
        }
    }

    /// Creates a self-skip signal: a check decided during `setup` that it
    /// doesn't apply here (missing a required resource, an unsupported
    /// environment, ...). Distinct from an ordinary stage failure: the
    /// task transitions to [`crate::stage::Stage::Skipped`] rather than
    /// [`crate::stage::Stage::Failed`], and is not counted against the
    /// failure budget.
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            message: reason.into(),
            skip: true,
            source: None,
        }
    }

    /// True if this error was raised via [`StageError::skip`].
    pub fn is_skip(&self) -> bool {
        self.skip
    }
}

/// Synthesized by [`crate::task::Task::fail_dependency`] when the
/// dependency oracle reports a failed dependency for a task still
/// [`crate::stage::Stage::Waiting`]. Carries no detail of its own; the
/// failed dependency's key and stage are already visible to the caller
/// through the task index.
#[derive(Clone, Debug, Error)]
#[error("dependencies failed")]
pub struct TaskDependencyError;

/// Cause of an abort raised mid-drain: the failure budget, a listener
/// forcing it, or a caller-observed fatal signal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AbortCause {
    /// The configured failure budget was exceeded.
    FailureBudgetExceeded {
        /// Number of failures observed when the abort was raised.
        failures: usize,
        /// The configured budget.
        budget: usize,
    },
    /// A registered [`crate::events::TaskListener`] requested an abort.
    Listener(FailureLimitError),
    /// A caller observed a fatal host signal (via
    /// [`crate::policy::asynchronous::AsyncDriver::interrupt_handle`] or
    /// [`crate::policy::serial::SerialDriver::interrupt_handle`]) and the
    /// drive loop tore every current task down in response.
    Interrupted,
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortCause::FailureBudgetExceeded { failures, budget } => write!(
                f,
                "failure budget exceeded: {failures} failures against a budget of {budget}"
            ),
            AbortCause::Listener(e) => write!(f, "{e}"),
            AbortCause::Interrupted => write!(f, "interrupted by a fatal signal"),
        }
    }
}

impl std::error::Error for AbortCause {}

/// Outcome of a `setup` call that didn't lead to the task becoming ready
/// to compile or run.
///
/// Kept distinct from the ordinary [`crate::task::StageAttempt`] shape
/// because a self-skip (see [`StageError::skip`]) must never be counted
/// against the failure budget, while a stage failure must.
#[derive(Debug)]
pub enum SetupHalt {
    /// The check skipped itself; `reason` is the message passed to
    /// [`StageError::skip`].
    Skipped(String),
    /// `setup` raised an ordinary stage failure.
    Failed(Option<AbortCause>),
}

/// Raised by a [`crate::events::TaskListener`] to force an early abort,
/// independent of the configured failure budget.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{reason}")]
pub struct FailureLimitError {
    /// Human-readable reason for the forced abort.
    pub reason: String,
}

impl FailureLimitError {
    /// Creates a new forced-abort reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// An error surfaced from [`crate::policy::asynchronous::AsyncDriver::drain`]
/// or [`crate::policy::serial::SerialDriver::submit`].
#[derive(Debug, Error)]
pub enum DrainError {
    /// The drive loop was aborted; partial progress may have been made.
    #[error("execution aborted: {0}")]
    Aborted(#[from] AbortCause),

    /// A stage call raised while a task occupied `stage`.
    #[error("task {task} failed in stage {stage}: {source}")]
    Stage {
        /// The task's key, rendered via `Debug` since `K` is caller-defined.
        task: String,
        /// Name of the stage that raised, e.g. `"compile"` or `"cleanup"`.
        /// Not a [`crate::stage::Stage`] value: cleanup failures are
        /// reported with stage name `"cleanup"` after the task has already
        /// reached [`crate::stage::Stage::Retired`].
        stage: String,
        /// The underlying stage error.
        #[source]
        source: StageError,
    },
}
