/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of the downlink framer.
///
/// None of these stop the framer: a failed frame is logged and dropped, a
/// failed drop-directory scan is retried on the next update.
#[derive(Debug, Error)]
pub enum FramerError {
    #[error("cannot open link {}: {source}", .device.display())]
    LinkOpen {
        device: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write to link failed: {0}")]
    LinkWrite(#[source] std::io::Error),

    #[error("frame write did not finish within {0:?}")]
    LinkTimeout(Duration),

    #[error("drop directory {}: {source}", .path.display())]
    DropDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `setup` ran twice; the link is already owned by a worker.
    #[error("framer worker already started")]
    AlreadyStarted,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}
