// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adaptive poll back-off for the asynchronous drive loop.
//!
//! Grounded on ReFrame's `_PollController`: a snooze interval that grows
//! geometrically while the number of tasks awaiting a poll stays stable,
//! and resets to the floor the moment that count changes (an arrival or a
//! completion, either of which means the next poll is likely to find
//! something new).

use std::{
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

/// Floor for the snooze interval.
pub const SLEEP_MIN: Duration = Duration::from_millis(100);
/// Ceiling for the snooze interval.
pub const SLEEP_MAX: Duration = Duration::from_secs(10);
/// Geometric growth rate applied to the interval on every snooze that
/// finds the running count unchanged.
pub const SLEEP_GROWTH: f64 = 1.1;

/// Tracks and applies the snooze interval between drain ticks.
#[derive(Clone, Copy, Debug)]
pub struct PollController {
    interval: Duration,
    last_running: Option<usize>,
    polls: u64,
    /// Wall-clock reference for the poll-rate metric, set on the first
    /// `note_running` call of a drain.
    started_at: Option<Instant>,
}

impl Default for PollController {
    fn default() -> Self {
        Self {
            interval: SLEEP_MIN,
            last_running: None,
            polls: 0,
            started_at: None,
        }
    }
}

impl PollController {
    /// Creates a controller starting at the floor interval.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `n` tasks are currently awaiting a poll.
    ///
    /// Resets the interval to the floor if `n` differs from the value
    /// seen at the previous call (including the very first call of a
    /// drain); otherwise grows it geometrically toward the ceiling. The
    /// very first call also initializes the wall-clock reference the poll
    /// rate is measured against.
    pub fn note_running(&mut self, n: usize) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        if self.last_running != Some(n) {
            self.interval = SLEEP_MIN;
        } else {
            self.interval = self.interval.mul_f64(SLEEP_GROWTH).min(SLEEP_MAX);
        }
        self.last_running = Some(n);
    }

    /// Sleeps for the current interval and records the tick for the poll
    /// rate metric.
    pub fn snooze(&mut self) {
        thread::sleep(self.interval);
        self.polls += 1;
        debug!(
            interval = ?self.interval,
            poll_rate = self.poll_rate(),
            "poll-controller snooze"
        );
    }

    /// The interval `snooze` would currently sleep for.
    pub fn current_interval(&self) -> Duration {
        self.interval
    }

    /// Total number of snoozes taken since this controller was created.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Polls per second since this controller's first `note_running` call.
    /// `0.0` before a drain has observed any running task, or if no
    /// measurable time has elapsed yet.
    pub fn poll_rate(&self) -> f64 {
        match self.started_at {
            Some(t0) => {
                let elapsed = t0.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    self.polls as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_floor() {
        assert_eq!(PollController::new().current_interval(), SLEEP_MIN);
    }

    #[test]
    fn stable_count_grows_toward_ceiling_and_clamps() {
        let mut ctl = PollController::new();
        ctl.note_running(1);
        for _ in 0..500 {
            ctl.note_running(1);
        }
        assert_eq!(ctl.current_interval(), SLEEP_MAX);
    }

    #[test]
    fn changed_count_resets_to_floor() {
        let mut ctl = PollController::new();
        ctl.note_running(1);
        for _ in 0..10 {
            ctl.note_running(1);
        }
        assert!(ctl.current_interval() > SLEEP_MIN);
        ctl.note_running(2);
        assert_eq!(ctl.current_interval(), SLEEP_MIN);
    }

    #[test]
    fn snooze_counts_polls() {
        let mut ctl = PollController::new();
        ctl.interval = Duration::from_millis(0);
        ctl.snooze();
        ctl.snooze();
        assert_eq!(ctl.polls(), 2);
    }

    #[test]
    fn poll_rate_is_zero_before_any_running_task_observed() {
        assert_eq!(PollController::new().poll_rate(), 0.0);
    }

    #[test]
    fn poll_rate_is_positive_once_a_drain_has_snoozed() {
        let mut ctl = PollController::new();
        ctl.interval = Duration::from_millis(0);
        ctl.note_running(1);
        ctl.snooze();
        ctl.snooze();
        assert!(ctl.poll_rate() > 0.0);
    }
}
