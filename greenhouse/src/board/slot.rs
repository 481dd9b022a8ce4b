/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-module bookkeeping owned by the board.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use crate::module::{Module, StatusMap};
use crate::telemetry::Origin;

/// Scheduling state of one module.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotState {
    pub enabled: bool,
    /// Cadence in seconds.
    pub update_frequency: f64,
    /// Time passed to the last dispatched update.  Starts at `0.0`, so every
    /// module is due on the first tick.
    pub last_execution_time: f64,
    /// Wall time of the last update that completed successfully.
    pub last_execution_duration: Option<Duration>,
}

impl SlotState {
    pub fn new(update_frequency: f64) -> Self {
        Self {
            enabled: true,
            update_frequency,
            last_execution_time: 0.0,
            last_execution_duration: None,
        }
    }

    /// `true` iff the module is enabled and more than `update_frequency`
    /// seconds have passed since its last execution.  Pure: never mutates.
    pub fn is_due(&self, t: f64) -> bool {
        self.enabled && t - self.last_execution_time > self.update_frequency
    }
}

/// A registered module together with the board's bookkeeping for it.
pub struct ModuleSlot {
    pub(crate) module: Arc<dyn Module>,
    pub(crate) origin: Origin,
    state: Mutex<SlotState>,
}

impl ModuleSlot {
    pub(crate) fn new(module: Arc<dyn Module>, origin: Origin, update_frequency: f64) -> Self {
        Self {
            module,
            origin,
            state: Mutex::new(SlotState::new(update_frequency)),
        }
    }

    pub fn name(&self) -> &str {
        self.origin.name()
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current state.
    pub fn state(&self) -> SlotState {
        self.lock().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn is_due(&self, t: f64) -> bool {
        self.lock().is_due(t)
    }

    /// If the module is due at `t`, stamp `last_execution_time = t` and
    /// return `true`.  Check and stamp happen under one lock.
    pub(crate) fn try_claim(&self, t: f64) -> bool {
        let mut state = self.lock();
        if state.is_due(t) {
            state.last_execution_time = t;
            true
        } else {
            false
        }
    }

    pub(crate) fn record_duration(&self, elapsed: Duration) {
        self.lock().last_execution_duration = Some(elapsed);
    }

    /// Enable or disable the module.  A disabled module is neither updated
    /// nor given bus events.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.lock();
        if state.enabled != enabled {
            if enabled {
                info!("Module `{}` got enabled", self.origin.name());
            } else {
                warn!("Module `{}` got disabled", self.origin.name());
            }
        }
        state.enabled = enabled;
    }

    /// Status entry: bookkeeping merged with the module's own diagnostics.
    pub fn status(&self) -> StatusMap {
        let state = self.state();
        let mut map = StatusMap::new();
        map.insert("enabled".into(), json!(state.enabled));
        map.insert(
            "last_execution_time".into(),
            json!(state.last_execution_time),
        );
        map.insert(
            "last_execution_duration".into(),
            json!(state.last_execution_duration.map(|d| d.as_secs_f64())),
        );
        map.insert("update_frequency".into(), json!(state.update_frequency));
        map.extend(self.module.status());
        map
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
