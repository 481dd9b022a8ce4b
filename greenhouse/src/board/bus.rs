/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Synchronous fan-out of telemetry and media.
//!
//! Delivery goes to every enabled module except the origin, in registration
//! order, and finishes before the publish call returns.  A failing or
//! panicking recipient is logged and skipped; the remaining recipients still
//! get the event.  There is no queue and no retry at this layer.

use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::Result;
use tracing::{error, trace};

use super::Board;
use crate::module::Module;
use crate::telemetry::{MediaEvent, OriginId, TelemetryEvent};

impl Board {
    /// Deliver `event` to every other enabled telemetry sink.
    ///
    /// Returns the number of sinks that accepted it.
    pub fn publish_telemetry(&self, event: &TelemetryEvent) -> usize {
        self.fan_out("telemetry", event.origin.id(), |module| {
            module
                .as_telemetry_sink()
                .map(|sink| sink.receive_telemetry(event))
        })
    }

    /// Deliver `event` to every other enabled media sink.
    ///
    /// Returns the number of sinks that accepted it.
    pub fn publish_media(&self, event: &MediaEvent) -> usize {
        self.fan_out("media", event.origin.id(), |module| {
            module.as_media_sink().map(|sink| sink.receive_media(event))
        })
    }

    fn fan_out<F>(&self, kind: &str, origin: OriginId, deliver: F) -> usize
    where
        F: Fn(&dyn Module) -> Option<Result<()>>,
    {
        let mut delivered = 0;
        for slot in self.slots() {
            if slot.origin().id() == origin || !slot.is_enabled() {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| deliver(slot.module().as_ref()))) {
                Ok(None) => {}
                Ok(Some(Ok(()))) => {
                    delivered += 1;
                    trace!(recipient = %slot.name(), kind = kind, "delivered");
                }
                Ok(Some(Err(e))) => {
                    error!(
                        recipient = %slot.name(),
                        "Error while logging {} to {}: {:#}", kind, slot.name(), e
                    );
                }
                Err(_) => {
                    error!(
                        recipient = %slot.name(),
                        "Panic while logging {} to {}", kind, slot.name()
                    );
                }
            }
        }
        delivered
    }
}
