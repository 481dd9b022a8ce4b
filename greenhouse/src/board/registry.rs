/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Registry of module updates that are currently executing.
//!
//! A name is present iff an update task for that module is alive.  Entries
//! are inserted by the board (check-and-insert under one lock) and removed by
//! a [`RunningGuard`] owned by the update task itself, so the entry outlives
//! a watchdog abort until the task has really stopped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct RunningRegistry {
    inner: Arc<Mutex<HashMap<String, f64>>>,
}

impl RunningRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, f64>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `name` as running an update started at `t`.
    ///
    /// Returns `None` when the name is already registered: the previous
    /// invocation has not finished.
    pub fn try_register(&self, name: &str, t: f64) -> Option<RunningGuard> {
        let mut map = self.lock();
        if map.contains_key(name) {
            return None;
        }
        map.insert(name.to_owned(), t);
        Some(RunningGuard {
            registry: self.clone(),
            name: name.to_owned(),
        })
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Running module names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Removes its registry entry when dropped.
#[derive(Debug)]
pub struct RunningGuard {
    registry: RunningRegistry,
    name: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.name);
        debug!(module = %self.name, "update task finished");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
