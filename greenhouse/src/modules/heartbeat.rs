/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Liveness heartbeat and debug LED switch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::module::{Context, DebugIndicator, Module, StatusMap, Testable};

/// A single digital output line.
pub trait OutputPin: Send + Sync {
    fn set(&self, high: bool);
    fn is_high(&self) -> bool;

    fn toggle(&self) {
        self.set(!self.is_high());
    }
}

/// Stand-in for a line that is not wired.  Remembers its level so status
/// output stays meaningful.
#[derive(Debug, Default)]
pub struct NullPin {
    level: AtomicBool,
}

impl OutputPin for NullPin {
    fn set(&self, high: bool) {
        self.level.store(high, Ordering::Relaxed);
    }

    fn is_high(&self) -> bool {
        self.level.load(Ordering::Relaxed)
    }
}

/// Pin that counts rising edges.  Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryPin {
    level: Arc<AtomicBool>,
    rising_edges: Arc<AtomicU64>,
}

impl MemoryPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rising_edges(&self) -> u64 {
        self.rising_edges.load(Ordering::SeqCst)
    }
}

impl OutputPin for MemoryPin {
    fn set(&self, high: bool) {
        if high && !self.level.swap(high, Ordering::SeqCst) {
            self.rising_edges.fetch_add(1, Ordering::SeqCst);
        } else {
            self.level.store(high, Ordering::SeqCst);
        }
    }

    fn is_high(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

/// Pulses the heartbeat line on every update and blinks the debug LED.
///
/// The debug-LED-enable line gates all debug LEDs on the board; it is what
/// the `debug_led_enable` command switches.
pub struct HeartbeatModule {
    heartbeat: Box<dyn OutputPin>,
    led: Box<dyn OutputPin>,
    debug_led_enable: Box<dyn OutputPin>,
    test_pulses: u32,
    test_interval: Duration,
}

impl HeartbeatModule {
    pub const NAME: &'static str = "heartbeat";

    pub fn new(
        heartbeat: Box<dyn OutputPin>,
        led: Box<dyn OutputPin>,
        debug_led_enable: Box<dyn OutputPin>,
    ) -> Self {
        Self {
            heartbeat,
            led,
            debug_led_enable,
            test_pulses: 10,
            test_interval: Duration::from_millis(100),
        }
    }

    /// Heartbeat with every line unwired.
    pub fn unwired() -> Self {
        Self::new(
            Box::<NullPin>::default(),
            Box::<NullPin>::default(),
            Box::<NullPin>::default(),
        )
    }

    fn pulse(&self) {
        self.heartbeat.set(true);
        self.led.toggle();
        self.heartbeat.set(false);
    }
}

#[async_trait]
impl Module for HeartbeatModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn setup(&self, _ctx: &Context) -> Result<()> {
        self.led.set(true);
        self.debug_led_enable.set(false);
        Ok(())
    }

    async fn update(&self, _t: f64, _ctx: &Context) -> Result<()> {
        self.pulse();
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.led.set(false);
        self.heartbeat.set(false);
        Ok(())
    }

    fn status(&self) -> StatusMap {
        let mut map = StatusMap::new();
        map.insert("led".into(), json!(self.led.is_high()));
        map.insert("debug_led_enable".into(), json!(self.debug_led_enable.is_high()));
        map
    }

    fn as_testable(&self) -> Option<&dyn Testable> {
        Some(self)
    }

    fn as_indicator(&self) -> Option<&dyn DebugIndicator> {
        Some(self)
    }
}

#[async_trait]
impl Testable for HeartbeatModule {
    async fn test(&self) -> Result<()> {
        debug!("Pulsing heartbeat {} times", self.test_pulses);
        for _ in 0..self.test_pulses {
            self.pulse();
            tokio::time::sleep(self.test_interval).await;
        }
        Ok(())
    }
}

impl DebugIndicator for HeartbeatModule {
    fn set_enabled(&self, on: bool) {
        self.debug_led_enable.set(on);
    }

    fn toggle(&self) {
        self.debug_led_enable.toggle();
    }

    fn is_enabled(&self) -> bool {
        self.debug_led_enable.is_high()
    }
}
