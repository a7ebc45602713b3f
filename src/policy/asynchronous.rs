// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-task asynchronous execution policy.
//!
//! Grounded on `AsynchronousExecutionPolicy` in the original executor
//! policies: `submit` only registers a case, and `drain` repeatedly polls
//! every queued job in a batch, advances each current task's stage
//! machine, sweeps retired tasks whose `ref_count` has dropped to zero,
//! and snoozes according to the poll controller before the next cycle.

use crate::{
    admission,
    case::{Case, CaseKey, JobHandle, PartitionId},
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
use indexmap::{IndexMap, IndexSet};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::instrument;

/// Drives many cases concurrently through non-blocking scheduler polls.
pub struct AsyncDriver<K: CaseKey> {
    config: DriverConfig,
    events: EventBus<K>,
    tasks: IndexMap<K, Task<K>>,
    /// Tasks that have not yet reached a terminal stage, in submission
    /// order; `drain` advances a snapshot of this set on every iteration.
    current: IndexSet<K>,
    retired: Vec<K>,
    local_queue: IndexSet<K>,
    partition_queues: IndexMap<PartitionId, IndexSet<K>>,
    local_scheduler: Box<dyn Scheduler>,
    poller: PollController,
    num_failed: usize,
    /// Set by a caller (typically from its own fatal-signal handler) to
    /// request an abort; consumed once per `drain` iteration.
    interrupt: Arc<AtomicBool>,
}

impl<K: CaseKey> AsyncDriver<K> {
    /// Creates a new driver with the given configuration, backed by
    /// `local_scheduler` for every case whose `local`/`build_locally` flag
    /// routes it off the partition scheduler.
    pub fn new(config: DriverConfig, local_scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            config,
            events: EventBus::new(),
            tasks: IndexMap::new(),
            current: IndexSet::new(),
            retired: Vec::new(),
            local_queue: IndexSet::new(),
            partition_queues: IndexMap::new(),
            local_scheduler,
            poller: PollController::new(),
            num_failed: 0,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers a listener. Listeners fire in registration order.
    pub fn add_listener(&mut self, listener: Box<dyn TaskListener<K>>) {
        self.events.register(listener);
    }

    /// A thread-safe flag a caller's own fatal-signal handler can set
    /// (`handle.store(true, Ordering::SeqCst)`) to request an abort. The
    /// next `drain` iteration observes it, tears down every current task,
    /// and returns `Err(DrainError::Aborted(AbortCause::Interrupted))`.
    ///
    /// Cloning this handle is how a caller outside the drive loop — a
    /// `ctrlc`-style handler running on another thread — reaches into a
    /// cooperative, single-threaded engine without sharing anything else
    /// about its state.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Forces an immediate abort: tears down every current task and
    /// returns the resulting [`DrainError`]. For a caller that already
    /// holds a `&mut AsyncDriver` and wants to abort synchronously rather
    /// than through [`AsyncDriver::interrupt_handle`].
    pub fn abort(&mut self, cause: AbortCause) -> DrainError {
        self.abort_all(cause)
    }

    /// Registers a case and marks its task `waiting`. Dependency
    /// resolution, setup, and every later stage happen later, inside
    /// `drain`.
    pub fn submit(&mut self, case: Case<K>, pipeline: Box<dyn Pipeline>) {
        let key = case.key.clone();
        for dep in &case.deps {
            if let Some(dep_task) = self.tasks.get_mut(dep) {
                dep_task.ref_count += 1;
            }
        }
        self.tasks.insert(key.clone(), Task::new(case, pipeline));
        self.current.insert(key);
    }

    /// A snapshot of this driver's current bookkeeping.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            submitted: self.tasks.len(),
            current: self.current.len(),
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
            local_queue_len: self.local_queue.len(),
            partition_queue_lens: self
                .partition_queues
                .iter()
                .map(|(pid, set)| (pid.clone(), set.len()))
                .collect(),
        }
    }

    /// Runs the drive loop until every registered task has reached a
    /// terminal stage, or until an abort-class condition (failure budget,
    /// a listener-forced abort) tears the run down.
    #[instrument(level = "debug", skip(self))]
    pub fn drain(&mut self) -> Result<(), DrainError> {
        while !self.current.is_empty() {
            if self.interrupt.swap(false, Ordering::SeqCst) {
                return Err(self.abort_all(AbortCause::Interrupted));
            }
            self.poll_batch()?;
            self.advance_all()?;
            self.sweep_retired()?;

            let running = self
                .current
                .iter()
                .filter(|k| matches!(self.tasks[*k].stage(), Stage::Compiling | Stage::Running))
                .count();
            if running > 0 {
                self.poller.note_running(running);
                self.poller.snooze();
            }
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

    fn dep_stages(&self, key: &K) -> Vec<Stage> {
        self.tasks[key]
            .case
            .deps
            .clone()
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
        self.current.clear();
        self.local_queue.clear();
        self.partition_queues.clear();
        DrainError::Aborted(cause)
    }

    fn remove_from_queue(&mut self, key: &K, local: bool, pid: &PartitionId) {
        if local {
            self.local_queue.shift_remove(key);
        } else if let Some(set) = self.partition_queues.get_mut(pid) {
            set.shift_remove(key);
        }
    }

    // --- poll batch -----------------------------------------------------

    fn queued_jobs<'a>(&'a self, keys: impl Iterator<Item = &'a K>) -> Vec<JobHandle> {
        keys.filter_map(|k| {
            let task = &self.tasks[k];
            match task.stage() {
                Stage::Compiling => task.compile_job(),
                Stage::Running => task.run_job(),
                _ => None,
            }
        })
        .collect()
    }

    fn poll_batch(&mut self) -> Result<(), DrainError> {
        let pids: Vec<PartitionId> = self.partition_queues.keys().cloned().collect();
        for pid in pids {
            let keys: Vec<K> = self.partition_queues[&pid].iter().cloned().collect();
            let jobs = self.queued_jobs(keys.iter());
            if jobs.is_empty() {
                continue;
            }
            let partition = self.tasks[&keys[0]].case.partition.clone();
            if let Err(err) = partition.poll(&jobs) {
                self.fail_batch(&keys, "poll", err)?;
            }
        }

        let local_keys: Vec<K> = self.local_queue.iter().cloned().collect();
        let jobs = self.queued_jobs(local_keys.iter());
        if !jobs.is_empty() {
            if let Err(err) = self.local_scheduler.poll(&jobs) {
                self.fail_batch(&local_keys, "poll", err)?;
            }
        }
        Ok(())
    }

    fn fail_batch(
        &mut self,
        keys: &[K],
        stage_name: &'static str,
        err: StageError,
    ) -> Result<(), DrainError> {
        let message = err.to_string();
        for key in keys {
            let Some(task) = self.tasks.get_mut(key) else {
                continue;
            };
            if task.stage().is_terminal() {
                continue;
            }
            let local = task.compiles_locally() || task.runs_locally();
            let pid = task.case.partition.id().clone();
            let cause = task.fail_external(stage_name, StageError::msg(message.clone()), &mut self.events);
            self.current.shift_remove(key);
            self.remove_from_queue(key, local, &pid);
            self.note_failure(cause)?;
        }
        Ok(())
    }

    // --- advance ----------------------------------------------------------

    #[instrument(level = "debug", skip(self))]
    fn advance_all(&mut self) -> Result<(), DrainError> {
        let snapshot: Vec<K> = self.current.iter().cloned().collect();
        for key in snapshot {
            if !self.current.contains(&key) {
                continue;
            }
            let stage = self.tasks[&key].stage();
            match stage {
                Stage::Waiting => self.advance_waiting(&key)?,
                Stage::ReadyToCompile => self.advance_ready_to_compile(&key)?,
                Stage::Compiling => self.advance_compiling(&key)?,
                Stage::ReadyToRun => self.advance_ready_to_run(&key)?,
                Stage::Running => self.advance_running(&key)?,
                Stage::Completed => self.advance_completed(&key)?,
                Stage::Failed | Stage::Skipped | Stage::Retired => {
                    self.current.shift_remove(&key);
                }
            }
        }
        Ok(())
    }

    fn advance_waiting(&mut self, key: &K) -> Result<(), DrainError> {
        match dependency::classify(self.dep_stages(key)) {
            DepVerdict::Waiting => Ok(()),
            DepVerdict::Skip => {
                self.tasks
                    .get_mut(key)
                    .expect("task in index")
                    .skip("a dependency was skipped", &mut self.events);
                self.current.shift_remove(key);
                Ok(())
            }
            DepVerdict::Fail => {
                let cause = self
                    .tasks
                    .get_mut(key)
                    .expect("task in index")
                    .fail_dependency(&mut self.events);
                self.current.shift_remove(key);
                self.note_failure(cause)
            }
            DepVerdict::Ready => {
                let result = self
                    .tasks
                    .get_mut(key)
                    .expect("task in index")
                    .setup(self.config.sched_options(), &mut self.events);
                match result {
                    Ok(()) => Ok(()),
                    Err(SetupHalt::Skipped(_)) => {
                        self.current.shift_remove(key);
                        Ok(())
                    }
                    Err(SetupHalt::Failed(cause)) => {
                        self.current.shift_remove(key);
                        self.note_failure(cause)
                    }
                }
            }
        }
    }

    fn advance_ready_to_compile(&mut self, key: &K) -> Result<(), DrainError> {
        let task = &self.tasks[key];
        let local = task.compiles_locally();
        let pid = task.case.partition.id().clone();
        let admitted = if local {
            admission::try_admit_local(self.local_queue.len(), self.config.local_max_jobs())
        } else {
            let occupancy = self.partition_queues.get(&pid).map_or(0, IndexSet::len);
            admission::try_admit_partition(occupancy, task.case.partition.max_jobs)
        };
        if !admitted {
            return Ok(());
        }

        let result = self
            .tasks
            .get_mut(key)
            .expect("task in index")
            .compile(&mut self.events);
        match result {
            Ok(()) => {
                if local {
                    self.local_queue.insert(key.clone());
                } else {
                    self.partition_queues.entry(pid).or_default().insert(key.clone());
                }
                Ok(())
            }
            Err(cause) => {
                self.current.shift_remove(key);
                self.note_failure(cause)
            }
        }
    }

    fn advance_compiling(&mut self, key: &K) -> Result<(), DrainError> {
        let local = self.tasks[key].compiles_locally();
        let pid = self.tasks[key].case.partition.id().clone();
        let result = self
            .tasks
            .get_mut(key)
            .expect("task in index")
            .poll_compile(&mut self.events);
        match result {
            Ok(false) => Ok(()),
            Ok(true) => {
                self.remove_from_queue(key, local, &pid);
                Ok(())
            }
            Err(cause) => {
                self.remove_from_queue(key, local, &pid);
                self.current.shift_remove(key);
                self.note_failure(cause)
            }
        }
    }

    fn advance_ready_to_run(&mut self, key: &K) -> Result<(), DrainError> {
        let task = &self.tasks[key];
        let local = task.runs_locally();
        let pid = task.case.partition.id().clone();
        let admitted = if local {
            admission::try_admit_local(self.local_queue.len(), self.config.local_max_jobs())
        } else {
            let occupancy = self.partition_queues.get(&pid).map_or(0, IndexSet::len);
            admission::try_admit_partition(occupancy, task.case.partition.max_jobs)
        };
        if !admitted {
            return Ok(());
        }

        let result = self
            .tasks
            .get_mut(key)
            .expect("task in index")
            .run(&mut self.events);
        match result {
            Ok(()) => {
                if local {
                    self.local_queue.insert(key.clone());
                } else {
                    self.partition_queues.entry(pid).or_default().insert(key.clone());
                }
                Ok(())
            }
            Err(cause) => {
                self.current.shift_remove(key);
                self.note_failure(cause)
            }
        }
    }

    fn advance_running(&mut self, key: &K) -> Result<(), DrainError> {
        let local = self.tasks[key].runs_locally();
        let pid = self.tasks[key].case.partition.id().clone();
        let result = self
            .tasks
            .get_mut(key)
            .expect("task in index")
            .poll_run(&mut self.events);
        match result {
            Ok(false) => Ok(()),
            Ok(true) => {
                self.remove_from_queue(key, local, &pid);
                Ok(())
            }
            Err(cause) => {
                self.remove_from_queue(key, local, &pid);
                self.current.shift_remove(key);
                self.note_failure(cause)
            }
        }
    }

    fn advance_completed(&mut self, key: &K) -> Result<(), DrainError> {
        let result = self.tasks.get_mut(key).expect("task in index").complete(
            self.config.skip_sanity_check(),
            self.config.skip_performance_check(),
            &mut self.events,
        );
        self.current.shift_remove(key);
        match result {
            Ok(()) => {
                self.decrement_deps(key);
                self.retired.push(key.clone());
                Ok(())
            }
            Err(cause) => self.note_failure(cause),
        }
    }

    fn decrement_deps(&mut self, key: &K) {
        let deps = self.tasks[key].case.deps.clone();
        for dep in deps {
            if let Some(dep_task) = self.tasks.get_mut(&dep) {
                dep_task.ref_count = dep_task.ref_count.saturating_sub(1);
            }
        }
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
}
