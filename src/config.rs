// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driver-wide configuration, built with the same builder pattern
//! nextest-runner uses for `TestRunnerBuilder`.
//!
//! CLI parsing and config-file loading (TOML/YAML/whatever a caller's own
//! tooling prefers) stay out of scope here; a [`DriverConfig`] is always
//! constructed in-process.

use crate::case::SchedOptions;

/// Configuration shared by [`crate::policy::serial::SerialDriver`] and
/// [`crate::policy::asynchronous::AsyncDriver`].
#[derive(Clone, Debug)]
pub struct DriverConfig {
    keep_stage_files: bool,
    skip_sanity_check: bool,
    skip_performance_check: bool,
    max_failures: Option<usize>,
    count_cleanup_failures_towards_budget: bool,
    local_max_jobs: usize,
    sched_options: SchedOptions,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            keep_stage_files: false,
            skip_sanity_check: false,
            skip_performance_check: false,
            max_failures: None,
            count_cleanup_failures_towards_budget: true,
            local_max_jobs: 0,
            sched_options: SchedOptions::default(),
        }
    }
}

impl DriverConfig {
    /// Starts a builder with default settings: no failure budget, sanity
    /// and performance checks enabled, stage files cleaned up, and cleanup
    /// failures counting toward whatever budget is configured.
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::default()
    }

    /// Whether a retired task's stage directory is kept on disk instead of
    /// being removed during cleanup.
    pub fn keep_stage_files(&self) -> bool {
        self.keep_stage_files
    }

    /// Whether the `sanity` pipeline stage is skipped.
    pub fn skip_sanity_check(&self) -> bool {
        self.skip_sanity_check
    }

    /// Whether the `performance` pipeline stage is skipped.
    pub fn skip_performance_check(&self) -> bool {
        self.skip_performance_check
    }

    /// The configured failure budget, if any.
    pub fn max_failures(&self) -> Option<usize> {
        self.max_failures
    }

    /// Whether a failure raised from a pipeline's `cleanup` stage counts
    /// toward the failure budget.
    ///
    /// The source model leaves this unspecified; we default to `true`
    /// (cleanup failures count) since a budget that silently ignores an
    /// entire class of failures is a surprising default, and expose it as
    /// a knob for callers who'd rather a flaky cleanup step not abort an
    /// otherwise-healthy run.
    pub fn count_cleanup_failures_towards_budget(&self) -> bool {
        self.count_cleanup_failures_towards_budget
    }

    /// The opaque scheduler options forwarded to every pipeline's `setup`.
    pub fn sched_options(&self) -> &SchedOptions {
        &self.sched_options
    }

    /// Capacity cap for the local queue (cases whose compile or run stage
    /// runs on the driver host rather than through a partition
    /// scheduler). `0` means unbounded.
    pub fn local_max_jobs(&self) -> usize {
        self.local_max_jobs
    }
}

/// Builder for [`DriverConfig`].
#[derive(Clone, Debug, Default)]
pub struct DriverConfigBuilder {
    keep_stage_files: Option<bool>,
    skip_sanity_check: Option<bool>,
    skip_performance_check: Option<bool>,
    max_failures: Option<usize>,
    count_cleanup_failures_towards_budget: Option<bool>,
    local_max_jobs: Option<usize>,
    sched_options: Option<SchedOptions>,
}

impl DriverConfigBuilder {
    /// Keeps retired tasks' stage directories on disk.
    pub fn keep_stage_files(mut self, value: bool) -> Self {
        self.keep_stage_files = Some(value);
        self
    }

    /// Skips the `sanity` pipeline stage.
    pub fn skip_sanity_check(mut self, value: bool) -> Self {
        self.skip_sanity_check = Some(value);
        self
    }

    /// Skips the `performance` pipeline stage.
    pub fn skip_performance_check(mut self, value: bool) -> Self {
        self.skip_performance_check = Some(value);
        self
    }

    /// Sets the failure budget. Once this many tasks have reached
    /// [`crate::stage::Stage::Failed`], the drive loop aborts.
    pub fn max_failures(mut self, max_failures: usize) -> Self {
        self.max_failures = Some(max_failures);
        self
    }

    /// Sets whether cleanup failures count toward the failure budget.
    pub fn count_cleanup_failures_towards_budget(mut self, value: bool) -> Self {
        self.count_cleanup_failures_towards_budget = Some(value);
        self
    }

    /// Sets the opaque scheduler options forwarded to every pipeline's
    /// `setup`.
    pub fn sched_options(mut self, sched_options: SchedOptions) -> Self {
        self.sched_options = Some(sched_options);
        self
    }

    /// Sets the local queue's capacity cap. `0` means unbounded.
    pub fn local_max_jobs(mut self, local_max_jobs: usize) -> Self {
        self.local_max_jobs = Some(local_max_jobs);
        self
    }

    /// Builds the config.
    pub fn build(self) -> DriverConfig {
        let defaults = DriverConfig::default();
        DriverConfig {
            keep_stage_files: self.keep_stage_files.unwrap_or(defaults.keep_stage_files),
            skip_sanity_check: self
                .skip_sanity_check
                .unwrap_or(defaults.skip_sanity_check),
            skip_performance_check: self
                .skip_performance_check
                .unwrap_or(defaults.skip_performance_check),
            max_failures: self.max_failures,
            count_cleanup_failures_towards_budget: self
                .count_cleanup_failures_towards_budget
                .unwrap_or(defaults.count_cleanup_failures_towards_budget),
            local_max_jobs: self.local_max_jobs.unwrap_or(defaults.local_max_jobs),
            sched_options: self.sched_options.unwrap_or(defaults.sched_options),
        }
    }
}
