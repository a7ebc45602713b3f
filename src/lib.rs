// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The regression-test execution engine.
//!
//! This crate drives a set of test cases through a multi-stage pipeline
//! (setup → compile → run → sanity → performance → finalize → cleanup)
//! while honouring inter-test dependencies, per-partition concurrency
//! limits, and partial-failure semantics.
//!
//! Two execution policies share the same pipeline contract:
//!
//! * [`policy::serial::SerialDriver`] fully completes one test before
//!   starting the next.
//! * [`policy::asynchronous::AsyncDriver`] multiplexes many tests through
//!   non-blocking scheduler polls with adaptive back-off, via
//!   [`policy::asynchronous::AsyncDriver::drain`].
//!
//! Both policies are built on the same primitives: a [`task::Task`] state
//! machine, a [`dependency`] oracle, an [`admission`] controller, a
//! [`poll::PollController`], and an [`events::EventBus`].
//!
//! The pipeline stages themselves (compile/run/sanity/performance) and the
//! batch schedulers are external collaborators, represented here as the
//! opaque [`pipeline::Pipeline`] and [`scheduler::Scheduler`] traits.

pub mod admission;
pub mod case;
pub mod config;
pub mod dependency;
pub mod errors;
pub mod events;
pub mod pipeline;
pub mod policy;
pub mod poll;
pub mod scheduler;
pub mod stage;
pub mod stats;
pub mod task;

pub use case::{Case, CaseKey, JobHandle, Partition, PartitionId, SchedOptions};
pub use config::{DriverConfig, DriverConfigBuilder};
pub use errors::{
    AbortCause, DrainError, FailureLimitError, SetupHalt, StageError, TaskDependencyError,
};
pub use events::{EventBus, TaskListener};
pub use pipeline::{Pipeline, StageOutcome, StageResult};
pub use policy::{asynchronous::AsyncDriver, serial::SerialDriver};
pub use scheduler::Scheduler;
pub use stage::Stage;
pub use stats::EngineStats;
pub use task::Task;
