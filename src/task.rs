// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-case task record: stage, ref-count, failure context, timings,
//! and the stage-invocation plumbing shared by both execution policies.

use crate::{
    case::{Case, CaseKey, JobHandle, SchedOptions},
    errors::{AbortCause, SetupHalt, StageError, TaskDependencyError},
    events::EventBus,
    pipeline::{Pipeline, StageOutcome, StageResult},
    stage::Stage,
};
use indexmap::IndexMap;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Outcome of a single stage invocation: either the value the stage
/// produced, or `None` if it failed (the task has already transitioned to
/// [`Stage::Failed`] and the failure event has fired) together with any
/// abort a listener requested.
pub type StageAttempt<T> = Result<T, Option<AbortCause>>;

/// One submitted case's running state.
pub struct Task<K: CaseKey> {
    /// The originating case.
    pub case: Case<K>,
    stage: Stage,
    /// Number of not-yet-finished dependents. Starts at the task's
    /// in-degree (dependents, not dependencies) and is decremented once
    /// per dependency by every task that succeeds.
    pub ref_count: usize,
    failed_stage: Option<String>,
    exc_info: Option<String>,
    timings: IndexMap<&'static str, Duration>,
    pipeline: Box<dyn Pipeline>,
    compile_job: Option<JobHandle>,
    run_job: Option<JobHandle>,
}

impl<K: CaseKey> Task<K> {
    /// Creates a new task in [`Stage::Waiting`] for the given case.
    pub fn new(case: Case<K>, pipeline: Box<dyn Pipeline>) -> Self {
        Self {
            case,
            stage: Stage::Waiting,
            ref_count: 0,
            failed_stage: None,
            exc_info: None,
            timings: IndexMap::new(),
            pipeline,
            compile_job: None,
            run_job: None,
        }
    }

    /// This task's key.
    pub fn key(&self) -> &K {
        &self.case.key
    }

    /// The task's current stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// True if the task is local for the compile stage — either globally
    /// local, or specifically `build_locally`.
    pub fn compiles_locally(&self) -> bool {
        self.pipeline.local() || self.pipeline.build_locally()
    }

    /// True if the task is local for the run stage.
    pub fn runs_locally(&self) -> bool {
        self.pipeline.local()
    }

    /// The job handle currently awaiting a compile-stage poll, if any.
    pub fn compile_job(&self) -> Option<JobHandle> {
        self.compile_job
    }

    /// The job handle currently awaiting a run-stage poll, if any.
    pub fn run_job(&self) -> Option<JobHandle> {
        self.run_job
    }

    /// Name of the stage that raised, if this task failed.
    pub fn failed_stage(&self) -> Option<&str> {
        self.failed_stage.as_deref()
    }

    /// Captured failure context, if this task failed.
    pub fn exc_info(&self) -> Option<&str> {
        self.exc_info.as_deref()
    }

    /// Returns the recorded duration of the named stages that ran,
    /// skipping any not yet populated.
    pub fn pipeline_timings<'a>(
        &'a self,
        stages: &'a [&'static str],
    ) -> impl Iterator<Item = (&'static str, Duration)> + 'a {
        stages
            .iter()
            .filter_map(move |name| self.timings.get(name).map(|d| (*name, *d)))
    }

    fn record_timing(&mut self, name: &'static str, elapsed: Duration) {
        self.timings.insert(name, elapsed);
    }

    fn fail(
        &mut self,
        stage_name: &'static str,
        err: &StageError,
        bus: &mut EventBus<K>,
    ) -> Option<AbortCause> {
        self.exc_info = Some(err.to_string());
        self.failed_stage = Some(stage_name.to_string());
        self.stage = Stage::Failed;
        bus.fire_failure(&self.case.key, stage_name)
    }

    /// Records a failure raised outside a [`Pipeline`] call — a batch
    /// scheduler's `poll` erroring out while this task's job was queued.
    pub fn fail_external(
        &mut self,
        stage_name: &'static str,
        err: StageError,
        bus: &mut EventBus<K>,
    ) -> Option<AbortCause> {
        self.fail(stage_name, &err, bus)
    }

    /// Runs one pipeline stage, recording its timing and, on failure,
    /// transitioning to [`Stage::Failed`] and firing `on_task_failure`.
    #[instrument(level = "debug", skip(self, bus, f))]
    fn run_stage<T>(
        &mut self,
        stage_name: &'static str,
        bus: &mut EventBus<K>,
        f: impl FnOnce(&mut dyn Pipeline) -> StageResult<T>,
    ) -> StageAttempt<T> {
        let start = Instant::now();
        let outcome = f(&mut *self.pipeline);
        self.record_timing(stage_name, start.elapsed());
        match outcome {
            Ok(value) => Ok(value),
            Err(err) => {
                let abort = self.fail(stage_name, &err, bus);
                Err(abort)
            }
        }
    }

    /// Runs `setup`, transitioning to [`Stage::ReadyToCompile`] (or
    /// directly to [`Stage::ReadyToRun`] for a run-only case) on success.
    ///
    /// A check may self-skip from `setup` by returning
    /// [`StageError::skip`] rather than an ordinary error — the task then
    /// moves to [`Stage::Skipped`] and `on_task_skip` fires instead of
    /// `on_task_failure`, and the skip is never counted against the
    /// failure budget.
    pub fn setup(
        &mut self,
        sched_options: &SchedOptions,
        bus: &mut EventBus<K>,
    ) -> Result<(), SetupHalt> {
        let start = Instant::now();
        let outcome = self.pipeline.setup(sched_options);
        self.record_timing("setup", start.elapsed());
        match outcome {
            Ok(()) => {
                self.stage = if self.pipeline.run_only() {
                    Stage::ReadyToRun
                } else {
                    Stage::ReadyToCompile
                };
                bus.fire_setup(&self.case.key);
                Ok(())
            }
            Err(err) if err.is_skip() => {
                let reason = err.to_string();
                self.skip(&reason, bus);
                Err(SetupHalt::Skipped(reason))
            }
            Err(err) => {
                let abort = self.fail("setup", &err, bus);
                Err(SetupHalt::Failed(abort))
            }
        }
    }

    /// Invokes `compile`, recording the returned job handle and entering
    /// [`Stage::Compiling`] unconditionally (a synchronous `Done` is
    /// treated as a job that is already finished on the next poll).
    pub fn compile(&mut self, bus: &mut EventBus<K>) -> StageAttempt<()> {
        let outcome = self.run_stage("compile", bus, |p| p.compile())?;
        self.compile_job = match outcome {
            StageOutcome::Pending(handle) => Some(handle),
            StageOutcome::Done => None,
        };
        self.stage = Stage::Compiling;
        bus.fire_compile(&self.case.key);
        Ok(())
    }

    /// Checks `compile_complete`. Returns `Ok(true)` and advances the
    /// stage once the compile job has finished.
    pub fn poll_compile(&mut self, bus: &mut EventBus<K>) -> StageAttempt<bool> {
        let done = self.run_stage("compile_complete", bus, |p| p.compile_complete())?;
        if done {
            self.compile_job = None;
            bus.fire_compile_exit(&self.case.key);
            self.stage = if self.pipeline.compile_only() {
                Stage::Completed
            } else {
                Stage::ReadyToRun
            };
        }
        Ok(done)
    }

    /// Invokes `run`, recording the returned job handle and entering
    /// [`Stage::Running`].
    pub fn run(&mut self, bus: &mut EventBus<K>) -> StageAttempt<()> {
        let outcome = self.run_stage("run", bus, |p| p.run())?;
        self.run_job = match outcome {
            StageOutcome::Pending(handle) => Some(handle),
            StageOutcome::Done => None,
        };
        self.stage = Stage::Running;
        bus.fire_run(&self.case.key);
        Ok(())
    }

    /// Checks `run_complete`. Returns `Ok(true)` and advances to
    /// [`Stage::Completed`] once the run job has finished.
    pub fn poll_run(&mut self, bus: &mut EventBus<K>) -> StageAttempt<bool> {
        let done = self.run_stage("run_complete", bus, |p| p.run_complete())?;
        if done {
            self.run_job = None;
            bus.fire_exit(&self.case.key);
            self.stage = Stage::Completed;
        }
        Ok(done)
    }

    /// Runs `sanity` (if not skipped by configuration and the case isn't
    /// `compile_only`), `performance` (same conditions), then `finalize`,
    /// and retires the task on success.
    pub fn complete(
        &mut self,
        skip_sanity: bool,
        skip_performance: bool,
        bus: &mut EventBus<K>,
    ) -> StageAttempt<()> {
        let compile_only = self.pipeline.compile_only();
        if !skip_sanity && !compile_only {
            self.run_stage("sanity", bus, |p| p.sanity())?;
        }
        if !skip_performance && !compile_only {
            self.run_stage("performance", bus, |p| p.performance())?;
        }
        self.run_stage("finalize", bus, |p| p.finalize())?;
        self.stage = Stage::Retired;
        bus.fire_success(&self.case.key);
        Ok(())
    }

    /// Marks the task [`Stage::Skipped`] because a dependency was skipped
    /// (or this task itself raised a skip during setup). Not counted as a
    /// failure.
    pub fn skip(&mut self, reason: &str, bus: &mut EventBus<K>) {
        self.stage = Stage::Skipped;
        bus.fire_skip(&self.case.key, reason);
    }

    /// Marks the task [`Stage::Failed`] because the dependency oracle
    /// found a failed dependency. Synthesizes a
    /// [`TaskDependencyError`] as the stage error's source.
    pub fn fail_dependency(&mut self, bus: &mut EventBus<K>) -> Option<AbortCause> {
        let err = StageError::from_source("dependencies failed", TaskDependencyError);
        self.fail("dependency", &err, bus)
    }

    /// Tears the task down unconditionally because of a global fatal
    /// condition (interrupt, failure-budget overflow). Unlike `fail`, does
    /// not fire `on_task_failure` or count toward the failure budget — the
    /// abort itself is the terminal signal.
    pub fn abort(&mut self, cause: &AbortCause) {
        debug!(task = ?self.case.key, %cause, "aborting task");
        self.exc_info = Some(cause.to_string());
        self.failed_stage = Some("abort".to_string());
        self.stage = Stage::Failed;
    }

    /// Invokes `cleanup` once this task's `ref_count` has reached zero
    /// (for a retired task) or after a failure. A cleanup failure is
    /// reported through `on_task_failure` with stage name `"cleanup"` but
    /// never changes `stage` away from whatever terminal state the task
    /// was already in, and never aborts the drain on its own.
    pub fn cleanup(&mut self, keep_files: bool, bus: &mut EventBus<K>) -> Option<AbortCause> {
        let start = Instant::now();
        let outcome = self.pipeline.cleanup(keep_files);
        self.record_timing("cleanup", start.elapsed());
        match outcome {
            Ok(()) => None,
            Err(err) => {
                self.exc_info = Some(err.to_string());
                self.failed_stage = Some("cleanup".to_string());
                bus.fire_failure(&self.case.key, "cleanup")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        case::{Case, JobHandle, Partition, PartitionId, SchedOptions},
        errors::SetupHalt,
        pipeline::StageOutcome,
        scheduler::Scheduler,
    };

    struct NullScheduler;

    impl Scheduler for NullScheduler {
        fn poll(&mut self, _jobs: &[JobHandle]) -> Result<(), StageError> {
            Ok(())
        }
    }

    struct StubPipeline {
        setup_err: Option<StageError>,
    }

    impl Pipeline for StubPipeline {
        fn setup(&mut self, _sched_options: &SchedOptions) -> StageResult<()> {
            match self.setup_err.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        fn compile(&mut self) -> StageResult<StageOutcome> {
            Ok(StageOutcome::Done)
        }
    }

    fn task_with(setup_err: Option<StageError>) -> Task<String> {
        let partition = Partition::new(PartitionId::new("p0"), 0, Box::new(NullScheduler));
        let case = Case::new("t0".to_string(), partition);
        Task::new(case, Box::new(StubPipeline { setup_err }))
    }

    #[test]
    fn setup_success_advances_to_ready_to_compile() {
        let mut bus = EventBus::new();
        let mut task = task_with(None);
        assert!(task.setup(&SchedOptions::default(), &mut bus).is_ok());
        assert_eq!(task.stage(), Stage::ReadyToCompile);
    }

    #[test]
    fn setup_skip_transitions_to_skipped_not_failed() {
        let mut bus = EventBus::new();
        let mut task = task_with(Some(StageError::skip("unsupported environment")));
        match task.setup(&SchedOptions::default(), &mut bus) {
            Err(SetupHalt::Skipped(reason)) => assert_eq!(reason, "unsupported environment"),
            other => panic!("expected Skipped, got {other:?}"),
        }
        assert_eq!(task.stage(), Stage::Skipped);
        assert!(task.failed_stage().is_none());
    }

    #[test]
    fn setup_failure_transitions_to_failed() {
        let mut bus = EventBus::new();
        let mut task = task_with(Some(StageError::msg("missing compiler")));
        match task.setup(&SchedOptions::default(), &mut bus) {
            Err(SetupHalt::Failed(None)) => {}
            other => panic!("expected Failed(None), got {other:?}"),
        }
        assert_eq!(task.stage(), Stage::Failed);
        assert_eq!(task.failed_stage(), Some("setup"));
    }

    #[test]
    fn setup_receives_configured_sched_options() {
        let mut bus = EventBus::new();
        let mut task = task_with(None);
        let opts = SchedOptions {
            flex_alloc_nodes: Some("4".to_string()),
            extra: vec!["--qos=debug".to_string()],
        };
        assert!(task.setup(&opts, &mut bus).is_ok());
    }

    struct CompileOnlyPipeline {
        sanity_called: std::rc::Rc<std::cell::Cell<bool>>,
        performance_called: std::rc::Rc<std::cell::Cell<bool>>,
    }

    impl Pipeline for CompileOnlyPipeline {
        fn compile(&mut self) -> StageResult<StageOutcome> {
            Ok(StageOutcome::Done)
        }
        fn sanity(&mut self) -> StageResult<()> {
            self.sanity_called.set(true);
            Ok(())
        }
        fn performance(&mut self) -> StageResult<()> {
            self.performance_called.set(true);
            Ok(())
        }
        fn compile_only(&self) -> bool {
            true
        }
    }

    #[test]
    fn compile_only_case_skips_sanity_and_performance() {
        let mut bus = EventBus::new();
        let partition = Partition::new(PartitionId::new("p0"), 0, Box::new(NullScheduler));
        let case = Case::new("t0".to_string(), partition);
        let sanity_called = std::rc::Rc::new(std::cell::Cell::new(false));
        let performance_called = std::rc::Rc::new(std::cell::Cell::new(false));
        let mut task = Task::new(
            case,
            Box::new(CompileOnlyPipeline {
                sanity_called: sanity_called.clone(),
                performance_called: performance_called.clone(),
            }),
        );

        assert!(task.complete(false, false, &mut bus).is_ok());
        assert_eq!(task.stage(), Stage::Retired);
        assert!(!sanity_called.get());
        assert!(!performance_called.get());
    }
}
