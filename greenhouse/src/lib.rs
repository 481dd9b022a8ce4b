/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Greenhouse – payload orchestrator
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── board/      – scheduler, watchdog, running registry, fan-out bus
//! ├── command/    – remote command parsing and board-side handlers
//! ├── config/     – YAML payload configuration
//! ├── framer/     – serial downlink framer (queue, wire encoding, link)
//! ├── module/     – module contract and capability traits
//! ├── modules/    – bundled modules (heartbeat, host telemetry, outputs, remote status)
//! ├── telemetry   – bus event types
//! ├── timeline    – cyclic value-over-time schedules
//! └── clock       – epoch-seconds wall clock
//! ```

pub mod board;
pub mod clock;
pub mod command;
pub mod config;
pub mod framer;
pub mod module;
pub mod modules;
pub mod telemetry;
pub mod timeline;
