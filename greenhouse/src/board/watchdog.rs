/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Deadline-bound module updates.
//!
//! Every update runs on its own tokio task.  The supervisor races the task's
//! `JoinHandle` against the update timeout:
//!
//! ```text
//! supervise ──spawn──► update task (owns RunningGuard)
//!     │                     │
//!     ├─ finished first ────┘  → Completed / Failed / Panicked
//!     └─ timer first ──────────→ abort task, TimedOut
//! ```
//!
//! Aborting cancels the update at its next await point.  The OS thread is
//! never killed; a task that does not yield keeps its registry entry until it
//! returns on its own.

use std::time::{Duration, Instant};

use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{debug, error};

use super::registry::RunningGuard;
use super::Board;
use crate::module::Context;

/// How one supervised update ended.
#[derive(Debug)]
pub enum UpdateOutcome {
    Completed(Duration),
    Failed(anyhow::Error),
    Panicked(String),
    TimedOut(Duration),
    /// The update task was cancelled from outside (runtime shutdown).
    Cancelled,
}

impl UpdateOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, UpdateOutcome::Completed(_))
    }
}

pub(crate) fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned()),
        Err(_) => "task cancelled".to_owned(),
    }
}

/// Run the update of slot `index` at time `t` under the watchdog.
///
/// `guard` is moved into the update task; the registry entry disappears when
/// that task ends.  Failures are logged here and never propagate.
pub(crate) async fn supervise(board: Board, index: usize, t: f64, guard: RunningGuard) -> UpdateOutcome {
    let slot = board.slot(index);
    let name = slot.name().to_owned();
    let module = std::sync::Arc::clone(&slot.module);
    let ctx = Context::new(board.clone(), slot.origin.clone());
    let deadline = board.settings().update_timeout;

    debug!(module = %name, t = t, "update started");
    let started = Instant::now();
    let mut task = tokio::spawn(async move {
        let _guard = guard;
        module.update(t, &ctx).await
    });

    let outcome = match timeout(deadline, &mut task).await {
        Ok(Ok(Ok(()))) => UpdateOutcome::Completed(started.elapsed()),
        Ok(Ok(Err(e))) => UpdateOutcome::Failed(e),
        Ok(Err(join_err)) if join_err.is_panic() => UpdateOutcome::Panicked(panic_message(join_err)),
        Ok(Err(_)) => UpdateOutcome::Cancelled,
        Err(_) => {
            task.abort();
            UpdateOutcome::TimedOut(deadline)
        }
    };

    match &outcome {
        UpdateOutcome::Completed(elapsed) => {
            slot.record_duration(*elapsed);
            debug!(module = %name, elapsed = ?elapsed, "update finished");
        }
        UpdateOutcome::Failed(e) => {
            error!(module = %name, t = t, "Exception raised in update: {:#}", e);
        }
        UpdateOutcome::Panicked(msg) => {
            error!(module = %name, t = t, "update panicked: {}", msg);
        }
        UpdateOutcome::TimedOut(deadline) => {
            error!(module = %name, t = t, deadline = ?deadline, "TIMEOUT: update aborted by watchdog");
        }
        UpdateOutcome::Cancelled => {
            error!(module = %name, t = t, "update task cancelled");
        }
    }
    outcome
}

/// Run a one-shot module hook (setup, destroy, test) on its own task so a
/// panic inside it is reported as an error instead of unwinding the board.
pub(crate) async fn isolate<F>(hook: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    match tokio::spawn(hook).await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            Err(anyhow::anyhow!("panicked: {}", panic_message(join_err)))
        }
        Err(_) => Err(anyhow::anyhow!("task cancelled")),
    }
}
