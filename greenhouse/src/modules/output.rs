/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Timeline-driven duty-cycle outputs (fans, grow lights).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::module::{Context, Module, StatusMap, Testable};
use crate::timeline::Timeline;

/// A PWM-style output taking a duty cycle in `0.0..=1.0`.
pub trait DutyCycleOutput: Send + Sync {
    fn set_duty_cycle(&self, value: f64) -> Result<()>;
    fn duty_cycle(&self) -> f64;
}

/// Output that only holds the commanded level.  Used where the PWM driver
/// runs outside this process.  Clones share state.
#[derive(Debug, Clone, Default)]
pub struct LevelOutput {
    bits: Arc<AtomicU64>,
}

impl LevelOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DutyCycleOutput for LevelOutput {
    fn set_duty_cycle(&self, value: f64) -> Result<()> {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn duty_cycle(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Output recording the most recent levels for inspection.  Clones share
/// state.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutput {
    history: Arc<Mutex<VecDeque<f64>>>,
}

impl MemoryOutput {
    /// Levels kept; older ones are dropped.
    pub const HISTORY_LEN: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<f64> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

impl DutyCycleOutput for MemoryOutput {
    fn set_duty_cycle(&self, value: f64) -> Result<()> {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.len() == Self::HISTORY_LEN {
            history.pop_front();
        }
        history.push_back(value);
        Ok(())
    }

    fn duty_cycle(&self) -> f64 {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .copied()
            .unwrap_or(0.0)
    }
}

/// Drives a [`DutyCycleOutput`] from a cyclic [`Timeline`] and publishes the
/// value it applied as `duty_cycle`.
pub struct TimelineOutput {
    name: String,
    timeline: Timeline<f64>,
    output: Box<dyn DutyCycleOutput>,
    test_step: Duration,
}

impl TimelineOutput {
    /// Levels the self-test steps through, in order.
    pub const TEST_LEVELS: [f64; 4] = [1.0, 0.75, 0.5, 0.0];

    pub fn new(name: impl Into<String>, timeline: Timeline<f64>, output: Box<dyn DutyCycleOutput>) -> Self {
        Self {
            name: name.into(),
            timeline,
            output,
            test_step: Duration::from_secs(3),
        }
    }

    /// How long each self-test level is held.
    pub fn with_test_step(mut self, step: Duration) -> Self {
        self.test_step = step;
        self
    }

    pub fn timeline(&self) -> &Timeline<f64> {
        &self.timeline
    }
}

#[async_trait]
impl Module for TimelineOutput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&self, _ctx: &Context) -> Result<()> {
        debug!(
            module = %self.name,
            "Total timeline duration: {} s",
            self.timeline.total_duration()
        );
        self.output.set_duty_cycle(0.0)
    }

    async fn update(&self, t: f64, ctx: &Context) -> Result<()> {
        let value = *self.timeline.value_at(t);
        debug!(module = %self.name, "New duty cycle: {}", value);
        self.output.set_duty_cycle(value)?;
        ctx.publish_telemetry(t, [("duty_cycle", value)]);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.output.set_duty_cycle(0.0)
    }

    fn status(&self) -> StatusMap {
        let mut map = StatusMap::new();
        map.insert("duty_cycle".into(), json!(self.output.duty_cycle()));
        map.insert("timeline_duration".into(), json!(self.timeline.total_duration()));
        map
    }

    fn as_testable(&self) -> Option<&dyn Testable> {
        Some(self)
    }
}

#[async_trait]
impl Testable for TimelineOutput {
    async fn test(&self) -> Result<()> {
        let previous = self.output.duty_cycle();
        for level in Self::TEST_LEVELS {
            debug!(module = %self.name, "TESTING: Set {}%", level * 100.0);
            self.output.set_duty_cycle(level)?;
            tokio::time::sleep(self.test_step).await;
        }
        debug!(module = %self.name, "TESTING: Reset to {}", previous);
        self.output.set_duty_cycle(previous)
    }
}
