/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Shared test modules.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use greenhouse::board::{Board, GitIdentity};
use greenhouse::config::BoardSettings;
use greenhouse::module::{Context, Module, TelemetrySink};
use greenhouse::telemetry::TelemetryEvent;

/// What a [`Scripted`] does when updated.
#[derive(Debug, Clone, Default)]
pub enum Behavior {
    #[default]
    Idle,
    /// Publish these fields with this timestamp.
    Publish(f64, Vec<(&'static str, f64)>),
    Sleep(Duration),
    Fail,
    Panic,
    /// Request board shutdown after this many updates.
    StopAfter(usize),
}

/// How a [`Scripted`] reacts to bus deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SinkMode {
    #[default]
    Accept,
    Fail,
    Panic,
}

/// Scriptable module recording everything that happens to it.
pub struct Scripted {
    name: String,
    behavior: Behavior,
    fail_setup: bool,
    sink_mode: SinkMode,
    pub setups: AtomicUsize,
    pub updates: AtomicUsize,
    pub finished: AtomicUsize,
    pub destroys: AtomicUsize,
    pub received: Mutex<Vec<TelemetryEvent>>,
}

impl Scripted {
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            behavior,
            fail_setup: false,
            sink_mode: SinkMode::Accept,
            setups: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_setup(name: &str) -> Arc<Self> {
        let mut scripted = Arc::into_inner(Self::new(name, Behavior::Idle)).unwrap();
        scripted.fail_setup = true;
        Arc::new(scripted)
    }

    /// Idle module whose telemetry sink reacts with `mode`.
    pub fn sink(name: &str, mode: SinkMode) -> Arc<Self> {
        let mut scripted = Arc::into_inner(Self::new(name, Behavior::Idle)).unwrap();
        scripted.sink_mode = mode;
        Arc::new(scripted)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<TelemetryEvent> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Module for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&self, _ctx: &Context) -> Result<()> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        if self.fail_setup {
            bail!("sensor not found");
        }
        Ok(())
    }

    async fn update(&self, _t: f64, ctx: &Context) -> Result<()> {
        let n = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behavior {
            Behavior::Idle => {}
            Behavior::Publish(time, fields) => {
                ctx.publish_telemetry(*time, fields.iter().copied());
            }
            Behavior::Sleep(d) => tokio::time::sleep(*d).await,
            Behavior::Fail => bail!("transient read error"),
            Behavior::Panic => panic!("scripted exploded"),
            Behavior::StopAfter(limit) => {
                if n >= *limit {
                    ctx.board().shutdown();
                }
            }
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_telemetry_sink(&self) -> Option<&dyn TelemetrySink> {
        Some(self)
    }
}

impl TelemetrySink for Scripted {
    fn receive_telemetry(&self, event: &TelemetryEvent) -> Result<()> {
        match self.sink_mode {
            SinkMode::Accept => {}
            SinkMode::Fail => bail!("disk full"),
            SinkMode::Panic => panic!("sink exploded"),
        }
        self.received.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn settings(dir: &Path) -> BoardSettings {
    BoardSettings {
        cycle_delay: Duration::from_millis(1),
        update_timeout: Duration::from_secs(1),
        data_location: dir.join("data"),
        ..BoardSettings::default()
    }
}

pub fn board(settings: BoardSettings, modules: Vec<(Arc<dyn Module>, f64)>) -> Board {
    let mut builder = Board::builder(settings).git_identity(GitIdentity::unknown());
    for (module, frequency) in modules {
        builder = builder.register(module, frequency);
    }
    builder.build().unwrap()
}
