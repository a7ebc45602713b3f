// Copyright (c) The regtest-engine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The two execution policies: [`serial::SerialDriver`] and
//! [`asynchronous::AsyncDriver`]. Both share the same [`crate::task::Task`]
//! state machine and [`crate::dependency`] oracle; they differ only in
//! whether a case completes inline inside `submit` or is multiplexed
//! through `drain`.

pub mod asynchronous;
pub mod serial;
