// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observer hooks into the drive loop.
//!
//! Mirrors the shape of nextest-runner's reporter: a trait of default
//! no-op callbacks a caller can selectively override, fired in listener
//! registration order. Only `on_task_failure` has a return value, modeling
//! the source policy's ability to raise a forced abort from inside a
//! failure callback.
//!
//! `on_task_setup`/`on_task_compile`/`on_task_compile_exit`/`on_task_run`/
//! `on_task_exit` are purely observational lifecycle hooks carried over
//! from the source policy; they don't participate in the accounting law
//! that every submitted case produces exactly one of `on_task_success`,
//! `on_task_failure`, or `on_task_skip`.

use crate::{
    case::CaseKey,
    errors::{AbortCause, FailureLimitError},
    stage::Stage,
};
use tracing::debug;

/// Observes task lifecycle transitions as the engine drives them.
///
/// Every method has a no-op default; implement only the ones you need.
pub trait TaskListener<K: CaseKey> {
    /// `setup()` completed for this task.
    fn on_task_setup(&mut self, _task: &K) {}

    /// `compile()` was invoked for this task.
    fn on_task_compile(&mut self, _task: &K) {}

    /// `compile_complete()` reported the compile job finished.
    fn on_task_compile_exit(&mut self, _task: &K) {}

    /// `run()` was invoked for this task.
    fn on_task_run(&mut self, _task: &K) {}

    /// `run_complete()` reported the run job finished.
    fn on_task_exit(&mut self, _task: &K) {}

    /// The dependency oracle classified this task (or its dependencies) as
    /// skip; the task transitioned to [`Stage::Skipped`].
    fn on_task_skip(&mut self, _task: &K, _reason: &str) {}

    /// The task reached [`Stage::Retired`].
    fn on_task_success(&mut self, _task: &K) {}

    /// The task reached [`Stage::Failed`]. `stage` names the stage that
    /// raised ("cleanup" for a post-retirement cleanup failure). May
    /// return `Some` to force an abort of the current drain, independent
    /// of the configured failure budget.
    fn on_task_failure(&mut self, _task: &K, _stage: &str) -> Option<FailureLimitError> {
        None
    }
}

/// Fans a task event out to every registered listener, in registration
/// order.
pub struct EventBus<K: CaseKey> {
    listeners: Vec<Box<dyn TaskListener<K>>>,
}

impl<K: CaseKey> Default for EventBus<K> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

impl<K: CaseKey> EventBus<K> {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Listeners fire in the order they were
    /// registered.
    pub fn register(&mut self, listener: Box<dyn TaskListener<K>>) {
        self.listeners.push(listener);
    }

    /// Fires `on_task_setup` on every listener.
    pub fn fire_setup(&mut self, task: &K) {
        for listener in &mut self.listeners {
            listener.on_task_setup(task);
        }
    }

    /// Fires `on_task_compile` on every listener.
    pub fn fire_compile(&mut self, task: &K) {
        for listener in &mut self.listeners {
            listener.on_task_compile(task);
        }
    }

    /// Fires `on_task_compile_exit` on every listener.
    pub fn fire_compile_exit(&mut self, task: &K) {
        for listener in &mut self.listeners {
            listener.on_task_compile_exit(task);
        }
    }

    /// Fires `on_task_run` on every listener.
    pub fn fire_run(&mut self, task: &K) {
        for listener in &mut self.listeners {
            listener.on_task_run(task);
        }
    }

    /// Fires `on_task_exit` on every listener.
    pub fn fire_exit(&mut self, task: &K) {
        for listener in &mut self.listeners {
            listener.on_task_exit(task);
        }
    }

    /// Fires `on_task_skip` on every listener.
    pub fn fire_skip(&mut self, task: &K, reason: &str) {
        debug!(?task, reason, "task skipped");
        for listener in &mut self.listeners {
            listener.on_task_skip(task, reason);
        }
    }

    /// Fires `on_task_success` on every listener.
    pub fn fire_success(&mut self, task: &K) {
        debug!(?task, "task retired");
        for listener in &mut self.listeners {
            listener.on_task_success(task);
        }
    }

    /// Fires `on_task_failure` on every listener, in order, returning the
    /// first non-`None` abort request.
    pub fn fire_failure(&mut self, task: &K, stage: &str) -> Option<AbortCause> {
        debug!(?task, stage, "task failed");
        let mut cause = None;
        for listener in &mut self.listeners {
            if let Some(reason) = listener.on_task_failure(task, stage) {
                cause.get_or_insert(AbortCause::Listener(reason));
            }
        }
        cause
    }
}
