// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dependency oracle: given a task's recorded dependency outcomes,
//! decides whether the task itself may proceed, must be skipped, or must
//! be failed.
//!
//! Grounded on ReFrame's `deps_failed` / `deps_succeeded` / `deps_skipped`
//! helpers and the ordering `advance_wait` applies them in: a failed
//! dependency always wins over a skipped one, a skipped dependency always
//! wins over "still waiting", and only once every dependency has
//! succeeded does the task become ready.

use crate::stage::Stage;

/// The verdict the oracle reaches for one task given its dependencies'
/// stages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DepVerdict {
    /// At least one dependency hasn't reached a terminal stage yet.
    Waiting,
    /// Every dependency succeeded (reached [`Stage::Retired`]); the task
    /// may advance to [`Stage::ReadyToCompile`].
    Ready,
    /// At least one dependency reached [`Stage::Failed`]. Takes priority
    /// over `Skip` when a dependency set contains both.
    Fail,
    /// No dependency failed, but at least one reached [`Stage::Skipped`].
    Skip,
}

/// Classifies a task's readiness from its dependencies' current stages.
///
/// `deps` is the stage of each dependency as currently known; a
/// dependency absent from the task index entirely should be presented to
/// this function as [`Stage::Retired`] (already succeeded), matching the
/// source model's treatment of dependencies outside the current run.
pub fn classify(deps: impl IntoIterator<Item = Stage>) -> DepVerdict {
    let mut any_failed = false;
    let mut any_skipped = false;
    let mut any_pending = false;

    for stage in deps {
        match stage {
            Stage::Failed => any_failed = true,
            Stage::Skipped => any_skipped = true,
            Stage::Retired => {}
            _ => any_pending = true,
        }
    }

    if any_failed {
        DepVerdict::Fail
    } else if any_pending {
        DepVerdict::Waiting
    } else if any_skipped {
        DepVerdict::Skip
    } else {
        DepVerdict::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_deps_is_ready() {
        assert_eq!(classify(std::iter::empty()), DepVerdict::Ready);
    }

    #[test]
    fn all_retired_is_ready() {
        assert_eq!(
            classify([Stage::Retired, Stage::Retired]),
            DepVerdict::Ready
        );
    }

    #[test]
    fn pending_dep_waits() {
        assert_eq!(
            classify([Stage::Retired, Stage::Running]),
            DepVerdict::Waiting
        );
    }

    #[test]
    fn skipped_dep_skips() {
        assert_eq!(
            classify([Stage::Retired, Stage::Skipped]),
            DepVerdict::Skip
        );
    }

    #[test]
    fn failed_dep_fails() {
        assert_eq!(
            classify([Stage::Retired, Stage::Failed]),
            DepVerdict::Fail
        );
    }

    #[test]
    fn failed_beats_skipped() {
        assert_eq!(
            classify([Stage::Skipped, Stage::Failed]),
            DepVerdict::Fail
        );
    }

    #[test]
    fn failed_beats_pending() {
        assert_eq!(
            classify([Stage::Running, Stage::Failed]),
            DepVerdict::Fail
        );
    }
}
