/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Event types carried over the board's fan-out bus.
//!
//! ```text
//! sensor module ──(TelemetryEvent)──► Board::publish_telemetry ──► every other enabled sink
//! camera module ──(MediaEvent)──────► Board::publish_media ──────► every other enabled sink
//! ```
//!
//! Events are ephemeral: they live for exactly one fan-out call.  Sinks that
//! need to keep data (the packet framer queue, a database) copy what they need.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

// ── Origin ────────────────────────────────────────────────────────────────────

/// Structural identity of an event producer.
///
/// Assigned by the board when a module is registered.  The bus compares ids,
/// never names, when it skips the origin of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OriginId(usize);

impl OriginId {
    /// Reserved id of the board itself (shell captures, status exports).
    pub const BOARD: OriginId = OriginId(usize::MAX);

    pub(crate) fn module(index: usize) -> Self {
        OriginId(index)
    }
}

/// Producer token attached to every event: the structural id plus the
/// module name used to qualify telemetry fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    id: OriginId,
    name: Arc<str>,
}

impl Origin {
    pub(crate) fn new(id: OriginId, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> OriginId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ── Value ─────────────────────────────────────────────────────────────────────

/// A scalar telemetry value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// One timestamped observation from a module.
///
/// Fields keep their insertion order; the packet framer relies on it to lay
/// out frames deterministically.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub origin: Origin,
    /// Seconds since the UNIX epoch.
    pub time: f64,
    pub fields: Vec<(String, Value)>,
}

impl TelemetryEvent {
    pub fn new(origin: Origin, time: f64) -> Self {
        Self {
            origin,
            time,
            fields: Vec::new(),
        }
    }

    /// Append a field, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A named binary artifact (image, video, script capture, export).
#[derive(Debug, Clone, PartialEq)]
pub struct MediaEvent {
    pub origin: Origin,
    pub name: String,
    pub data: Vec<u8>,
}

impl MediaEvent {
    pub fn new(origin: Origin, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            origin,
            name: name.into(),
            data: data.into(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
