/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the board.
//!
//! Only conditions outside the per-module isolation boundary show up here.
//! A module that fails its own hooks never produces a [`BoardError`]; it is
//! logged and either disabled (setup) or retried (update).

use std::path::PathBuf;

use thiserror::Error;

use crate::clock::ClockError;

/// Fatal board failures.
///
/// Returned from [`BoardBuilder::build()`](super::BoardBuilder::build) and
/// [`Board::run()`](super::Board::run).  `run()` always completes the destroy
/// pass before handing one of these back.
#[derive(Debug, Error)]
pub enum BoardError {
    /// Two modules were registered under the same name.
    ///
    /// Names qualify downlink field names and key the running-task registry,
    /// so they must be unique.
    #[error("module name '{0}' is registered twice")]
    DuplicateModule(String),

    /// A module was registered with a cadence that is negative or not finite.
    #[error("module '{module}' has invalid update frequency {frequency}")]
    InvalidFrequency { module: String, frequency: f64 },

    /// The data directory could not be created.
    #[error("cannot create data location {}: {source}", .path.display())]
    DataLocation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The wall clock went backwards past the UNIX epoch.
    #[error("cannot read the wall clock: {0}")]
    Clock(#[from] ClockError),

    /// `run()` was called on a board that already ran.
    #[error("board has already been started")]
    AlreadyStarted,

    /// The loop task ended without returning (cancelled by the runtime).
    #[error("update loop task was aborted")]
    LoopAborted,
}
