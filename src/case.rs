// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test case: a (check, partition, environment) triple, opaque to the
//! engine except for its key, its dependencies, and which partition it
//! targets.

use crate::scheduler::Scheduler;
use std::{cell::RefCell, fmt, hash::Hash, rc::Rc, sync::Arc};

/// A handle an engine can index tasks by.
///
/// Two case values with structurally identical components are still
/// distinct cases in the source model (cases are compared by identity).
/// The Rust rendition asks the caller to hand out that identity explicitly
/// as `K`, rather than relying on object identity: a monotonic counter, an
/// interned string, or a UUID all work, as long as `deps` references the
/// same keys the dependencies were submitted under.
pub trait CaseKey: Clone + Eq + Hash + fmt::Debug {}

impl<T: Clone + Eq + Hash + fmt::Debug> CaseKey for T {}

/// Opaque identifier for a scheduling partition.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub Arc<str>);

impl PartitionId {
    /// Creates a new partition id from anything string-like.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A logical scheduling domain: its own batch scheduler and job cap.
///
/// Shared by every case that targets it — `Rc` rather than `Arc` because
/// the engine is single-threaded and cooperative (see the crate-level
/// concurrency notes); there are no worker threads to share this across.
pub struct Partition {
    id: PartitionId,
    /// `partition_queues[p].cap`: the admission cap for this partition.
    pub max_jobs: usize,
    scheduler: RefCell<Box<dyn Scheduler>>,
}

impl Partition {
    /// Creates a new partition with its own scheduler and job cap.
    pub fn new(id: PartitionId, max_jobs: usize, scheduler: Box<dyn Scheduler>) -> Rc<Self> {
        Rc::new(Self {
            id,
            max_jobs,
            scheduler: RefCell::new(scheduler),
        })
    }

    /// This partition's identifier.
    pub fn id(&self) -> &PartitionId {
        &self.id
    }

    /// Polls the given jobs via this partition's scheduler.
    pub fn poll(&self, jobs: &[JobHandle]) -> Result<(), crate::errors::StageError> {
        self.scheduler.borrow_mut().poll(jobs)
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.id)
            .field("max_jobs", &self.max_jobs)
            .finish_non_exhaustive()
    }
}

/// An opaque handle to a scheduler job, as returned by
/// [`crate::pipeline::Pipeline::job`] / [`crate::pipeline::Pipeline::build_job`].
///
/// The engine never interprets job state directly; it only ever passes
/// these back to `Scheduler::poll` and consults
/// `compile_complete`/`run_complete` for progress.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct JobHandle(pub u64);

/// Opaque scheduler options forwarded verbatim to
/// [`crate::pipeline::Pipeline::setup`].
///
/// The engine neither parses nor validates this; it is a pass-through bag
/// set by whatever configuration layer sits above the engine — CLI
/// parsing and config loading are external collaborators.
#[derive(Clone, Debug, Default)]
pub struct SchedOptions {
    /// Number of nodes to flexibly allocate, if the scheduler supports it.
    pub flex_alloc_nodes: Option<String>,
    /// Additional opaque scheduler arguments.
    pub extra: Vec<String>,
}

/// A test case: the unit of submission.
///
/// `check`/`environment` are not modeled explicitly — they live inside the
/// [`crate::pipeline::Pipeline`] object associated with this case, which is
/// supplied alongside it at submission time.
#[derive(Clone, Debug)]
pub struct Case<K: CaseKey> {
    /// This case's own key.
    pub key: K,
    /// Keys of cases this one depends on. A dependency not present in the
    /// task index (e.g. restored from a previous session) is treated as
    /// already succeeded.
    pub deps: Vec<K>,
    /// The partition this case targets.
    pub partition: Rc<Partition>,
}

impl<K: CaseKey> Case<K> {
    /// Creates a new case with no dependencies.
    pub fn new(key: K, partition: Rc<Partition>) -> Self {
        Self {
            key,
            deps: Vec::new(),
            partition,
        }
    }

    /// Adds a dependency key.
    pub fn depends_on(mut self, dep: K) -> Self {
        self.deps.push(dep);
        self
    }
}
