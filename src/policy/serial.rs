// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-case-at-a-time execution policy.
//!
//! Grounded on `SerialExecutionPolicy` in the original executor policies:
//! `submit` drives a case through every pipeline stage before returning,
//! polling its own scheduler choice (local or partition) in a tight
//! poll/snooze loop rather than interleaving with other cases.

use crate::{
    case::{Case, CaseKey, JobHandle},
    config::DriverConfig,
    dependency::{self, DepVerdict},
    errors::{AbortCause, DrainError, SetupHalt, StageError},
    events::{EventBus, TaskListener},
    pipeline::Pipeline,
    poll::PollController,
    scheduler::Scheduler,
    stage::Stage,
    stats::EngineStats,
    task::Task,
};
use indexmap::IndexMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::instrument;

/// Why `run_case` returned before retiring the task.
enum RunCaseHalt {
    /// The check skipped itself during `setup`; already reported via
    /// `on_task_skip` and not counted toward the failure budget.
    Skipped,
    /// A stage raised; already reported via `on_task_failure`.
    Failed(Option<AbortCause>),
}

impl From<Option<AbortCause>> for RunCaseHalt {
    fn from(cause: Option<AbortCause>) -> Self {
        RunCaseHalt::Failed(cause)
    }
}

/// Drives cases to completion one at a time.
pub struct SerialDriver<K: CaseKey> {
    config: DriverConfig,
    events: EventBus<K>,
    tasks: IndexMap<K, Task<K>>,
    retired: Vec<K>,
    num_failed: usize,
    local_scheduler: Box<dyn Scheduler>,
    /// Set by a caller (typically from its own fatal-signal handler) to
    /// request an abort; consumed once per `submit` call and once per
    /// compile/run poll iteration inside it.
    interrupt: Arc<AtomicBool>,
}

impl<K: CaseKey> SerialDriver<K> {
    /// Creates a new driver with the given configuration, backed by
    /// `local_scheduler` for every case whose `local`/`build_locally` flag
    /// routes it off the partition scheduler.
    pub fn new(config: DriverConfig, local_scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            config,
            events: EventBus::new(),
            tasks: IndexMap::new(),
            retired: Vec::new(),
            num_failed: 0,
            local_scheduler,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers a listener. Listeners fire in registration order.
    pub fn add_listener(&mut self, listener: Box<dyn TaskListener<K>>) {
        self.events.register(listener);
    }

    /// A thread-safe flag a caller's own fatal-signal handler can set
    /// (`handle.store(true, Ordering::SeqCst)`) to request an abort. The
    /// next `submit` call (or the compile/run poll loop already in
    /// progress inside one) observes it, tears down every current task,
    /// and returns `Err(DrainError::Aborted(AbortCause::Interrupted))`.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Forces an immediate abort: tears down every current task and
    /// returns the resulting [`DrainError`]. For a caller that already
    /// holds a `&mut SerialDriver` and wants to abort synchronously rather
    /// than through [`SerialDriver::interrupt_handle`].
    pub fn abort(&mut self, cause: AbortCause) -> DrainError {
        self.abort_all(cause)
    }

    /// A snapshot of this driver's bookkeeping. The serial policy never
    /// queues, so `local_queue_len`/`partition_queue_lens` are always zero.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            submitted: self.tasks.len(),
            current: self
                .tasks
                .values()
                .filter(|t| !t.stage().is_terminal())
                .count(),
            retired: self.retired.len(),
            failed: self
                .tasks
                .values()
                .filter(|t| t.stage() == Stage::Failed)
                .count(),
            skipped: self
                .tasks
                .values()
                .filter(|t| t.stage() == Stage::Skipped)
                .count(),
            ..EngineStats::default()
        }
    }

    fn dep_stages(&self, case: &Case<K>) -> Vec<Stage> {
        case.deps
            .iter()
            .map(|dep| {
                self.tasks
                    .get(dep)
                    .map(|t| t.stage())
                    .unwrap_or(Stage::Retired)
            })
            .collect()
    }

    fn note_failure(&mut self, cause: Option<AbortCause>) -> Result<(), DrainError> {
        self.num_failed += 1;
        if let Some(cause) = cause {
            return Err(self.abort_all(cause));
        }
        if self.over_budget() {
            let cause = self.budget_cause();
            return Err(self.abort_all(cause));
        }
        Ok(())
    }

    fn over_budget(&self) -> bool {
        self.config
            .max_failures()
            .is_some_and(|budget| self.num_failed >= budget)
    }

    fn budget_cause(&self) -> AbortCause {
        AbortCause::FailureBudgetExceeded {
            failures: self.num_failed,
            budget: self.config.max_failures().unwrap_or(self.num_failed),
        }
    }

    fn abort_all(&mut self, cause: AbortCause) -> DrainError {
        for task in self.tasks.values_mut() {
            if !task.stage().is_terminal() {
                task.abort(&cause);
            }
        }
        DrainError::Aborted(cause)
    }

    /// Registers the case and runs it to completion: setup, compile,
    /// compile-wait, run, run-wait, optional sanity/performance, finalize.
    /// Opportunistically sweeps the retired list for tasks whose
    /// `ref_count` has reached zero.
    #[instrument(level = "debug", skip(self, pipeline))]
    pub fn submit(&mut self, case: Case<K>, pipeline: Box<dyn Pipeline>) -> Result<(), DrainError> {
        if self.interrupt.swap(false, Ordering::SeqCst) {
            return Err(self.abort_all(AbortCause::Interrupted));
        }

        let key = case.key.clone();
        for dep in &case.deps {
            if let Some(dep_task) = self.tasks.get_mut(dep) {
                dep_task.ref_count += 1;
            }
        }

        let verdict = dependency::classify(self.dep_stages(&case));
        let mut task = Task::new(case, pipeline);

        match verdict {
            DepVerdict::Fail => {
                let cause = task.fail_dependency(&mut self.events);
                self.tasks.insert(key, task);
                return self.note_failure(cause);
            }
            DepVerdict::Skip => {
                task.skip("a dependency was skipped", &mut self.events);
                self.tasks.insert(key, task);
                return Ok(());
            }
            // A dependency still running violates the serial contract
            // (submit blocks until completion), but is handled the same
            // as `Ready` rather than panicking on a caller bug.
            DepVerdict::Waiting | DepVerdict::Ready => {}
        }

        let result = self.run_case(&mut task);
        self.tasks.insert(key.clone(), task);

        match result {
            Ok(()) => {
                self.on_case_succeeded(&key);
                self.sweep_retired()
            }
            Err(RunCaseHalt::Skipped) => Ok(()),
            Err(RunCaseHalt::Failed(cause)) => self.note_failure(cause),
        }
    }

    fn poll_job(
        &mut self,
        task: &Task<K>,
        local: bool,
        handle: JobHandle,
    ) -> Result<(), StageError> {
        if local {
            self.local_scheduler.poll(&[handle])
        } else {
            task.case.partition.poll(&[handle])
        }
    }

    fn run_case(&mut self, task: &mut Task<K>) -> Result<(), RunCaseHalt> {
        match task.setup(self.config.sched_options(), &mut self.events) {
            Ok(()) => {}
            Err(SetupHalt::Skipped(_)) => return Err(RunCaseHalt::Skipped),
            Err(SetupHalt::Failed(cause)) => return Err(RunCaseHalt::Failed(cause)),
        }

        if task.stage() != Stage::ReadyToRun {
            task.compile(&mut self.events)?;
            let local = task.compiles_locally();
            let mut poller = PollController::new();
            loop {
                if self.interrupt.swap(false, Ordering::SeqCst) {
                    return Err(RunCaseHalt::Failed(Some(AbortCause::Interrupted)));
                }
                if let Some(handle) = task.compile_job() {
                    if let Err(e) = self.poll_job(task, local, handle) {
                        let cause = task.fail_external("compile", e, &mut self.events);
                        return Err(RunCaseHalt::Failed(cause));
                    }
                }
                if task.poll_compile(&mut self.events)? {
                    break;
                }
                poller.note_running(1);
                poller.snooze();
            }
        }

        if task.stage() != Stage::Completed {
            task.run(&mut self.events)?;
            let local = task.runs_locally();
            let mut poller = PollController::new();
            loop {
                if self.interrupt.swap(false, Ordering::SeqCst) {
                    return Err(RunCaseHalt::Failed(Some(AbortCause::Interrupted)));
                }
                if let Some(handle) = task.run_job() {
                    if let Err(e) = self.poll_job(task, local, handle) {
                        let cause = task.fail_external("run", e, &mut self.events);
                        return Err(RunCaseHalt::Failed(cause));
                    }
                }
                if task.poll_run(&mut self.events)? {
                    break;
                }
                poller.note_running(1);
                poller.snooze();
            }
        }

        task.complete(
            self.config.skip_sanity_check(),
            self.config.skip_performance_check(),
            &mut self.events,
        )
        .map_err(RunCaseHalt::Failed)
    }

    fn on_case_succeeded(&mut self, key: &K) {
        let deps = self.tasks[key].case.deps.clone();
        for dep in deps {
            if let Some(dep_task) = self.tasks.get_mut(&dep) {
                dep_task.ref_count = dep_task.ref_count.saturating_sub(1);
            }
        }
        self.retired.push(key.clone());
    }

    fn sweep_retired(&mut self) -> Result<(), DrainError> {
        let keep_files = self.config.keep_stage_files();
        let mut still_retired = Vec::with_capacity(self.retired.len());
        let mut abort_cause = None;
        for key in self.retired.drain(..) {
            let task = self.tasks.get_mut(&key).expect("retired task in index");
            if task.ref_count == 0 {
                let cause = task.cleanup(!keep_files, &mut self.events);
                if self.config.count_cleanup_failures_towards_budget() && cause.is_some() {
                    self.num_failed += 1;
                }
                if abort_cause.is_none() {
                    abort_cause = cause;
                }
            } else {
                still_retired.push(key);
            }
        }
        self.retired = still_retired;

        if self.over_budget() || abort_cause.is_some() {
            let cause = abort_cause.unwrap_or_else(|| self.budget_cause());
            return Err(self.abort_all(cause));
        }
        Ok(())
    }

    /// Final best-effort cleanup sweep of anything still in the retired
    /// list, regardless of `ref_count`. Carried over from the source
    /// policy's `exit()`.
    pub fn exit(&mut self) {
        let keep_files = self.config.keep_stage_files();
        for key in self.retired.drain(..) {
            if let Some(task) = self.tasks.get_mut(&key) {
                let _ = task.cleanup(!keep_files, &mut self.events);
            }
        }
    }

    /// Looks up a task's current stage by key.
    pub fn stage_of(&self, key: &K) -> Option<Stage> {
        self.tasks.get(key).map(|t| t.stage())
    }

    /// The job handles currently known for a task, if any (compile, run).
    pub fn jobs_of(&self, key: &K) -> Option<(Option<JobHandle>, Option<JobHandle>)> {
        self.tasks
            .get(key)
            .map(|t| (t.compile_job(), t.run_job()))
    }
}
