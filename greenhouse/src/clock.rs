/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Wall-clock helpers.
//!
//! Every timestamp that crosses a module boundary is an `f64` count of
//! seconds since the UNIX epoch.  That is the unit modules use for cadences,
//! the unit telemetry carries on the wire, and the unit of `quit` deadlines.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};

/// The system clock reported a time before the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("system clock is set before the UNIX epoch")]
pub struct ClockError;

/// Current wall-clock time in seconds since the UNIX epoch.
pub fn now() -> Result<f64, ClockError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .map_err(|_| ClockError)
}

/// Like [`now`], but falls back to `0.0` when the clock is broken.
///
/// Only used on diagnostic paths (status snapshots, file names) where a bad
/// clock must not turn into a failure of its own.
pub fn now_or_zero() -> f64 {
    now().unwrap_or(0.0)
}

/// Local date stamp used in export and script file names, e.g. `20260117_134502`.
pub fn file_stamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Human-readable local rendering of an epoch timestamp, for log lines.
pub fn format_epoch(t: f64) -> String {
    // Millisecond resolution is plenty for log output.
    DateTime::from_timestamp_millis((t * 1000.0) as i64)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| format!("{t:.3}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(now().unwrap() > 1_577_836_800.0);
    }

    #[test]
    fn file_stamp_has_date_and_time_parts() {
        let stamp = file_stamp();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
        assert!(stamp.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn format_epoch_renders_a_date() {
        let s = format_epoch(1_700_000_000.25);
        assert!(s.starts_with("2023-11-1"), "got {s}");
        assert!(s.ends_with(".250"), "got {s}");
    }
}
