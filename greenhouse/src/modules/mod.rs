/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Modules bundled with the orchestrator.
//!
//! Hardware drivers live outside this crate; the modules here talk to their
//! devices through small traits ([`OutputPin`], [`DutyCycleOutput`]) with
//! null implementations for boards where a line is not wired.

pub mod heartbeat;
pub mod host;
pub mod output;
pub mod remote;

pub use heartbeat::{HeartbeatModule, MemoryPin, NullPin, OutputPin};
pub use host::HostTelemetryModule;
pub use output::{DutyCycleOutput, LevelOutput, MemoryOutput, TimelineOutput};
pub use remote::RemoteStatusModule;
