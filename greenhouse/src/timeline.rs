/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cyclic value-over-time schedules.
//!
//! A [`Timeline`] is a list of `(duration, value)` segments that repeats
//! forever.  Actuator modules hold one and ask it which value is active at
//! the current time, e.g. a light schedule of 16 h on / 8 h off:
//!
//! ```rust
//! use greenhouse::timeline::{Segment, Timeline};
//!
//! let light = Timeline::new(vec![
//!     Segment::new(16.0 * 3600.0, 1.0),
//!     Segment::new(8.0 * 3600.0, 0.0),
//! ])
//! .unwrap();
//!
//! assert_eq!(*light.value_at(3600.0), 1.0);
//! assert_eq!(*light.value_at(20.0 * 3600.0), 0.0);
//! ```

use serde::Deserialize;
use thiserror::Error;

/// Rejected timeline definitions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimelineError {
    #[error("timeline has no segments")]
    Empty,

    #[error("segment {index} has invalid duration {duration} (must be finite and >= 0)")]
    InvalidDuration { index: usize, duration: f64 },

    #[error("timeline total duration is zero")]
    ZeroTotal,
}

/// One step of a timeline: `value` is active for `duration` seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Segment<T> {
    pub duration: f64,
    pub value: T,
}

impl<T> Segment<T> {
    pub fn new(duration: f64, value: T) -> Self {
        Self { duration, value }
    }
}

/// A validated cyclic schedule.
#[derive(Debug, Clone)]
pub struct Timeline<T> {
    segments: Vec<Segment<T>>,
    total: f64,
}

impl<T> Timeline<T> {
    /// Validate `segments` and precompute the cycle length.
    ///
    /// Zero-length segments are allowed (they are never selected unless they
    /// are first in the cycle and `t` lands exactly on the cycle start), but
    /// the cycle as a whole must be longer than zero.
    pub fn new(segments: Vec<Segment<T>>) -> Result<Self, TimelineError> {
        if segments.is_empty() {
            return Err(TimelineError::Empty);
        }
        for (index, seg) in segments.iter().enumerate() {
            if !seg.duration.is_finite() || seg.duration < 0.0 {
                return Err(TimelineError::InvalidDuration {
                    index,
                    duration: seg.duration,
                });
            }
        }
        let total: f64 = segments.iter().map(|s| s.duration).sum();
        if total <= 0.0 {
            return Err(TimelineError::ZeroTotal);
        }
        Ok(Self { segments, total })
    }

    /// Length of one full cycle in seconds.
    pub fn total_duration(&self) -> f64 {
        self.total
    }

    pub fn segments(&self) -> &[Segment<T>] {
        &self.segments
    }

    /// Value active at time `t`.
    ///
    /// `t` is reduced modulo the cycle length (negative times wrap forward)
    /// and the segments are walked cumulatively; the first segment whose
    /// cumulative end meets or exceeds the offset wins.
    pub fn value_at(&self, t: f64) -> &T {
        let offset = t.rem_euclid(self.total);
        let mut end = 0.0;
        for seg in &self.segments {
            end += seg.duration;
            if end >= offset {
                return &seg.value;
            }
        }
        // `end` of the last segment is `total` computed in the same order, and
        // `rem_euclid` yields an offset strictly below it.
        unreachable!(
            "timeline offset {offset} beyond cumulative duration {end} (total {})",
            self.total
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
