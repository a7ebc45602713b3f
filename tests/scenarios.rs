// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios from the engine's design notes, driven against an
//! in-memory fake pipeline/scheduler pair rather than real subprocesses.

use regtest_engine::{
    case::{Case, JobHandle, Partition, PartitionId, SchedOptions},
    config::DriverConfig,
    errors::StageError,
    events::TaskListener,
    pipeline::{Pipeline, StageOutcome, StageResult},
    policy::asynchronous::AsyncDriver,
    policy::serial::SerialDriver,
    scheduler::Scheduler,
    stage::Stage,
};
use std::{
    cell::RefCell,
    rc::Rc,
    sync::{Arc, Mutex},
};

/// A scheduler that completes every job the very next time it's polled.
#[derive(Default)]
struct InstantScheduler;

impl Scheduler for InstantScheduler {
    fn poll(&mut self, _jobs: &[JobHandle]) -> Result<(), StageError> {
        Ok(())
    }
}

/// A fake pipeline whose every stage succeeds immediately, optionally
/// raising a skip or failure from a named stage.
struct FakePipeline {
    fail_at: Option<&'static str>,
    skip_at: Option<&'static str>,
    local: bool,
}

impl FakePipeline {
    fn ok() -> Self {
        Self {
            fail_at: None,
            skip_at: None,
            local: false,
        }
    }

    fn failing_at(stage: &'static str) -> Self {
        Self {
            fail_at: Some(stage),
            skip_at: None,
            local: false,
        }
    }

    fn skipping_at(stage: &'static str) -> Self {
        Self {
            fail_at: None,
            skip_at: Some(stage),
            local: false,
        }
    }

    fn check(&self, stage: &'static str) -> StageResult<()> {
        if self.fail_at == Some(stage) {
            return Err(StageError::msg(format!("{stage} failed")));
        }
        if self.skip_at == Some(stage) {
            return Err(StageError::skip(format!("{stage} skip")));
        }
        Ok(())
    }
}

impl Pipeline for FakePipeline {
    fn setup(&mut self, _sched_options: &SchedOptions) -> StageResult<()> {
        self.check("setup")
    }
    fn compile(&mut self) -> StageResult<StageOutcome> {
        self.check("compile")?;
        Ok(StageOutcome::Done)
    }
    fn compile_complete(&mut self) -> StageResult<bool> {
        Ok(true)
    }
    fn run(&mut self) -> StageResult<StageOutcome> {
        self.check("run")?;
        Ok(StageOutcome::Done)
    }
    fn run_complete(&mut self) -> StageResult<bool> {
        Ok(true)
    }
    fn sanity(&mut self) -> StageResult<()> {
        self.check("sanity")
    }
    fn performance(&mut self) -> StageResult<()> {
        self.check("performance")
    }
    fn finalize(&mut self) -> StageResult<()> {
        self.check("finalize")
    }
    fn local(&self) -> bool {
        self.local
    }
}

fn partition(name: &str, max_jobs: usize) -> Rc<Partition> {
    Partition::new(
        PartitionId::new(name.to_string()),
        max_jobs,
        Box::new(InstantScheduler),
    )
}

/// Records every `on_task_success`/`on_task_skip`/`on_task_failure` call,
/// in order, as `(key, kind)` pairs.
#[derive(Default, Clone)]
struct Recorder(Arc<Mutex<Vec<(String, &'static str)>>>);

impl Recorder {
    fn events(&self) -> Vec<(String, &'static str)> {
        self.0.lock().unwrap().clone()
    }
}

impl TaskListener<String> for Recorder {
    fn on_task_success(&mut self, task: &String) {
        self.0.lock().unwrap().push((task.clone(), "success"));
    }
    fn on_task_skip(&mut self, task: &String, _reason: &str) {
        self.0.lock().unwrap().push((task.clone(), "skip"));
    }
    fn on_task_failure(
        &mut self,
        task: &String,
        _stage: &str,
    ) -> Option<regtest_engine::errors::FailureLimitError> {
        self.0.lock().unwrap().push((task.clone(), "failure"));
        None
    }
}

#[test]
fn linear_chain_runs_in_dependency_order() {
    let p = partition("p0", 4);
    let recorder = Recorder::default();
    let mut driver = SerialDriver::<String>::new(DriverConfig::default(), Box::new(InstantScheduler));
    driver.add_listener(Box::new(recorder.clone()));

    driver
        .submit(Case::new("A".into(), p.clone()), Box::new(FakePipeline::ok()))
        .unwrap();
    driver
        .submit(
            Case::new("B".into(), p.clone()).depends_on("A".into()),
            Box::new(FakePipeline::ok()),
        )
        .unwrap();
    driver
        .submit(
            Case::new("C".into(), p).depends_on("B".into()),
            Box::new(FakePipeline::ok()),
        )
        .unwrap();

    let events = recorder.events();
    assert_eq!(
        events,
        vec![
            ("A".to_string(), "success"),
            ("B".to_string(), "success"),
            ("C".to_string(), "success"),
        ]
    );
    assert_eq!(driver.stage_of(&"A".to_string()), Some(Stage::Retired));
}

#[test]
fn skip_propagates_to_dependents() {
    let p = partition("p0", 4);
    let recorder = Recorder::default();
    let mut driver = SerialDriver::<String>::new(DriverConfig::default(), Box::new(InstantScheduler));
    driver.add_listener(Box::new(recorder.clone()));

    driver
        .submit(
            Case::new("A".into(), p.clone()),
            Box::new(FakePipeline::skipping_at("setup")),
        )
        .unwrap();
    driver
        .submit(
            Case::new("B".into(), p).depends_on("A".into()),
            Box::new(FakePipeline::ok()),
        )
        .unwrap();

    assert_eq!(driver.stage_of(&"A".to_string()), Some(Stage::Skipped));
    assert_eq!(driver.stage_of(&"B".to_string()), Some(Stage::Skipped));
    assert_eq!(
        recorder.events(),
        vec![
            ("A".to_string(), "skip"),
            ("B".to_string(), "skip"),
        ]
    );
    assert_eq!(recorder.events().len(), 2, "no failure counted for either task");
}

#[test]
fn dependency_failure_fails_dependents() {
    let p = partition("p0", 4);
    let recorder = Recorder::default();
    let mut driver = SerialDriver::<String>::new(DriverConfig::default(), Box::new(InstantScheduler));
    driver.add_listener(Box::new(recorder.clone()));

    driver
        .submit(
            Case::new("A".into(), p.clone()),
            Box::new(FakePipeline::failing_at("compile")),
        )
        .unwrap();
    driver
        .submit(
            Case::new("B".into(), p.clone()).depends_on("A".into()),
            Box::new(FakePipeline::ok()),
        )
        .unwrap();
    driver
        .submit(
            Case::new("C".into(), p).depends_on("A".into()),
            Box::new(FakePipeline::ok()),
        )
        .unwrap();

    assert_eq!(driver.stage_of(&"A".to_string()), Some(Stage::Failed));
    assert_eq!(driver.stage_of(&"B".to_string()), Some(Stage::Failed));
    assert_eq!(driver.stage_of(&"C".to_string()), Some(Stage::Failed));
}

#[test]
fn async_self_skip_propagates_without_counting_as_failure() {
    let p = partition("p0", 4);
    let recorder = Recorder::default();
    let mut driver = AsyncDriver::<String>::new(DriverConfig::default(), Box::new(InstantScheduler));
    driver.add_listener(Box::new(recorder.clone()));

    driver.submit(
        Case::new("A".into(), p.clone()),
        Box::new(FakePipeline::skipping_at("setup")),
    );
    driver.submit(
        Case::new("B".into(), p).depends_on("A".into()),
        Box::new(FakePipeline::ok()),
    );

    driver.drain().unwrap();

    assert_eq!(driver.stage_of(&"A".to_string()), Some(Stage::Skipped));
    assert_eq!(driver.stage_of(&"B".to_string()), Some(Stage::Skipped));
    assert!(
        recorder
            .events()
            .iter()
            .all(|(_, kind)| *kind == "skip"),
        "a self-skip must never be reported as a failure"
    );
}

#[test]
fn partition_saturation_admits_cap_plus_one() {
    let p = partition("p0", 2);
    let mut driver = AsyncDriver::<String>::new(DriverConfig::default(), Box::new(InstantScheduler));

    for i in 0..10 {
        driver.submit(
            Case::new(format!("case-{i}"), p.clone()),
            Box::new(FakePipeline::ok()),
        );
    }

    driver.drain().unwrap();

    for i in 0..10 {
        assert_eq!(
            driver.stage_of(&format!("case-{i}")),
            Some(Stage::Retired)
        );
    }
}

#[test]
fn interrupt_handle_aborts_mid_drain() {
    let p = partition("p0", 1);
    let mut driver = AsyncDriver::<String>::new(DriverConfig::default(), Box::new(InstantScheduler));
    let interrupt = driver.interrupt_handle();

    for i in 0..5 {
        driver.submit(
            Case::new(format!("case-{i}"), p.clone()),
            Box::new(FakePipeline::ok()),
        );
    }
    interrupt.store(true, std::sync::atomic::Ordering::SeqCst);

    let result = driver.drain();
    assert!(matches!(
        result,
        Err(regtest_engine::errors::DrainError::Aborted(
            regtest_engine::errors::AbortCause::Interrupted
        ))
    ));
}

#[test]
fn failure_budget_aborts_remaining_tasks() {
    let p = partition("p0", 4);
    let config = DriverConfig::builder().max_failures(2).build();
    let mut driver = AsyncDriver::<String>::new(config, Box::new(InstantScheduler));

    driver.submit(
        Case::new("f1".into(), p.clone()),
        Box::new(FakePipeline::failing_at("setup")),
    );
    driver.submit(
        Case::new("f2".into(), p.clone()),
        Box::new(FakePipeline::failing_at("setup")),
    );
    driver.submit(Case::new("ok".into(), p), Box::new(FakePipeline::ok()));

    let result = driver.drain();
    assert!(result.is_err());
}

/// A pipeline that records the `sched_options` it was handed at `setup`,
/// rather than just succeeding unconditionally like `FakePipeline`.
struct RecordingPipeline {
    seen: Rc<RefCell<Option<SchedOptions>>>,
}

impl Pipeline for RecordingPipeline {
    fn setup(&mut self, sched_options: &SchedOptions) -> StageResult<()> {
        *self.seen.borrow_mut() = Some(sched_options.clone());
        Ok(())
    }
    fn compile(&mut self) -> StageResult<StageOutcome> {
        Ok(StageOutcome::Done)
    }
    fn run(&mut self) -> StageResult<StageOutcome> {
        Ok(StageOutcome::Done)
    }
}

#[test]
fn sched_options_reach_pipeline_setup() {
    let p = partition("p0", 4);
    let seen = Rc::new(RefCell::new(None));
    let config = DriverConfig::builder()
        .sched_options(SchedOptions {
            flex_alloc_nodes: Some("4".to_string()),
            extra: vec!["--qos=debug".to_string()],
        })
        .build();
    let mut driver = SerialDriver::<String>::new(config, Box::new(InstantScheduler));

    driver
        .submit(
            Case::new("A".into(), p),
            Box::new(RecordingPipeline { seen: seen.clone() }),
        )
        .unwrap();

    let recorded = seen.borrow();
    let opts = recorded.as_ref().expect("setup was called");
    assert_eq!(opts.flex_alloc_nodes.as_deref(), Some("4"));
    assert_eq!(opts.extra, vec!["--qos=debug".to_string()]);
}
