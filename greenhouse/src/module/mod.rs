/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The module contract.
//!
//! A module is one unit of scheduled work: a sensor, an actuator, a logger.
//! Instead of a class hierarchy the contract is split into one required trait
//! and a handful of orthogonal capabilities a module opts into by returning
//! `Some(self)` from the matching accessor:
//!
//! | Capability | Used by |
//! |---|---|
//! | [`TelemetrySink`] | `Board::publish_telemetry` fan-out |
//! | [`MediaSink`] | `Board::publish_media` fan-out |
//! | [`Testable`] | `test` command |
//! | [`Resettable`] | `reset` command |
//! | [`Camera`] | `camera` / `video` commands |
//! | [`DebugIndicator`] | `debug_led_enable` command |
//! | [`DataStore`] | `database` command |
//!
//! All hooks take `&self`; a module that keeps mutable state guards it
//! internally.  This lets the bus deliver into a module while that module's
//! own update is running on another task.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

use crate::board::Board;
use crate::telemetry::{MediaEvent, Origin, TelemetryEvent, Value};

/// Module status map as it appears under `modules.<name>` in a snapshot.
pub type StatusMap = Map<String, JsonValue>;

// ── Context ───────────────────────────────────────────────────────────────────

/// Handle given to a module for the duration of a hook: the board plus the
/// module's own origin token.
#[derive(Clone)]
pub struct Context {
    board: Board,
    origin: Origin,
}

impl Context {
    pub(crate) fn new(board: Board, origin: Origin) -> Self {
        Self { board, origin }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Start a telemetry event stamped with this module's origin.
    pub fn telemetry(&self, time: f64) -> TelemetryEvent {
        TelemetryEvent::new(self.origin.clone(), time)
    }

    /// Fan `fields` out to every other enabled module.
    pub fn publish_telemetry<I, K, V>(&self, time: f64, fields: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut event = self.telemetry(time);
        for (k, v) in fields {
            event.push(k, v);
        }
        self.board.publish_telemetry(&event)
    }

    pub fn publish_media(&self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> usize {
        let event = MediaEvent::new(self.origin.clone(), name, data);
        self.board.publish_media(&event)
    }
}

// ── Core trait ────────────────────────────────────────────────────────────────

/// A scheduled unit of sensing, actuation or logging.
///
/// Cadence, enable state and execution bookkeeping are owned by the board,
/// not by the module; see [`crate::board::ModuleSlot`].
#[async_trait]
pub trait Module: Send + Sync {
    /// Unique name within one board.  Also the prefix of qualified telemetry
    /// field names on the downlink.
    fn name(&self) -> &str;

    /// Called once before the loop starts.  An error disables the module for
    /// the rest of the run.
    async fn setup(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Called whenever the module is due.  Errors are logged and the module
    /// is retried on its next due cycle.
    async fn update(&self, t: f64, ctx: &Context) -> Result<()>;

    /// Always attempted at shutdown, even for disabled modules.
    async fn destroy(&self) -> Result<()> {
        Ok(())
    }

    /// Module-specific diagnostics, merged into the status snapshot.
    fn status(&self) -> StatusMap {
        StatusMap::new()
    }

    fn as_telemetry_sink(&self) -> Option<&dyn TelemetrySink> {
        None
    }

    fn as_media_sink(&self) -> Option<&dyn MediaSink> {
        None
    }

    fn as_testable(&self) -> Option<&dyn Testable> {
        None
    }

    fn as_resettable(&self) -> Option<&dyn Resettable> {
        None
    }

    fn as_camera(&self) -> Option<&dyn Camera> {
        None
    }

    fn as_indicator(&self) -> Option<&dyn DebugIndicator> {
        None
    }

    fn as_data_store(&self) -> Option<&dyn DataStore> {
        None
    }
}

// ── Capabilities ──────────────────────────────────────────────────────────────

/// Receives telemetry published by other modules.
pub trait TelemetrySink: Send + Sync {
    fn receive_telemetry(&self, event: &TelemetryEvent) -> Result<()>;
}

/// Receives media published by other modules.
pub trait MediaSink: Send + Sync {
    fn receive_media(&self, event: &MediaEvent) -> Result<()>;
}

/// Manual self-check, run by the `test` command and never by the schedule.
#[async_trait]
pub trait Testable: Send + Sync {
    async fn test(&self) -> Result<()>;
}

/// Purges persisted state.  Best effort; failures are swallowed by the caller.
pub trait Resettable: Send + Sync {
    fn reset(&self) -> Result<()>;
}

// ── Device collaborators ──────────────────────────────────────────────────────

/// Still/video capture requests routed from the command surface.
pub trait Camera: Send + Sync {
    /// Extension appended to requested file names, without the dot.
    fn file_extension(&self) -> &str;

    /// Duration used when a `video` command carries no payload.
    fn min_video_duration(&self) -> f64;

    /// Capture one still into `file_name` on the camera's next update.
    fn request_image(&self, file_name: String);

    /// Keep recording until the wall-clock time `until`.
    fn request_video(&self, until: f64);
}

/// Switch for the debug indicator LEDs.
pub trait DebugIndicator: Send + Sync {
    fn set_enabled(&self, on: bool);
    fn toggle(&self);
    fn is_enabled(&self) -> bool;
}

/// Persistent telemetry store that can be exported for downlink.
pub trait DataStore: Send + Sync {
    /// Copy the store to `dest`.
    fn export_to(&self, dest: &Path) -> Result<()>;

    /// Snapshot the store into memory.
    fn export_bytes(&self) -> Result<Vec<u8>>;
}
