/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pending telemetry queue.
//!
//! Entries are keyed by `(bucket, qualified field)` where the bucket is the
//! quantized timestamp.  The queue keeps insertion order; overwriting a key
//! replaces the value in place without moving the entry.
//!
//! ```text
//! seq:   0          1          2          3
//!      (100,a_x)  (100,a_y)  (101,a_x)  (100,b_t)
//!                                         ▲ same bucket as 0/1, later in order
//! ```
//!
//! [`PendingQueue::build_frame`] evicts stale entries, then drains the oldest
//! bucket in queue order until the size limit is reached.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use super::encode::{encode_field, encode_time};
use crate::telemetry::Value;

/// Limits applied when a frame is assembled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameLimits {
    /// Upper bound on one frame in bytes, newline included.
    pub maximum_packet_size: usize,
    /// Entries whose bucket is older than this many seconds are discarded.
    pub data_timeout: f64,
    pub float_precision: usize,
}

/// Result of one [`PendingQueue::build_frame`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameBuild {
    /// The encoded line, newline included.  `None` when nothing was left to
    /// send after eviction.
    pub frame: Option<String>,
    /// Data fields in `frame` (the time pair not counted).
    pub fields: usize,
    /// Entries removed without being sent (stale or too large to ever fit).
    pub discarded: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    bucket: i64,
    time: f64,
    field: String,
    value: Value,
}

type Key = (i64, String);

/// Insertion-ordered, last-write-wins telemetry queue.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: BTreeMap<u64, Entry>,
    index: HashMap<Key, u64>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or overwrite the value for `field` in the bucket of `t`.
    ///
    /// `q` is the quantization interval; the stored time is
    /// `floor(t / q) * q`.
    pub fn upsert(&mut self, t: f64, q: f64, field: impl Into<String>, value: Value) {
        let bucket = (t / q).floor();
        // Buckets are whole multiples of q; the integer index makes them hashable.
        let key = (bucket as i64, field.into());
        if let Some(seq) = self.index.get(&key) {
            if let Some(entry) = self.entries.get_mut(seq) {
                entry.value = value;
                return;
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            seq,
            Entry {
                bucket: key.0,
                time: bucket * q,
                field: key.1.clone(),
                value,
            },
        );
        self.index.insert(key, seq);
    }

    /// Queued `(time, field, value)` triples in queue order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &str, &Value)> {
        self.entries
            .values()
            .map(|e| (e.time, e.field.as_str(), &e.value))
    }

    fn remove(&mut self, seq: u64) -> Option<Entry> {
        let entry = self.entries.remove(&seq)?;
        self.index.remove(&(entry.bucket, entry.field.clone()));
        Some(entry)
    }

    /// Evict stale entries and assemble one frame from the oldest bucket.
    pub fn build_frame(&mut self, now: f64, limits: &FrameLimits) -> FrameBuild {
        let mut build = FrameBuild::default();

        let stale: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| now - e.time > limits.data_timeout)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in stale {
            if let Some(entry) = self.remove(seq) {
                warn!(
                    "Data timeout: ({}, {}) -> {:?}",
                    entry.time, entry.field, entry.value
                );
                build.discarded += 1;
            }
        }

        let Some(time) = self.entries.values().map(|e| e.time).reduce(f64::min) else {
            return build;
        };

        let mut frame = encode_time(time);
        let group: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.time == time)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in group {
            let Some(entry) = self.entries.get(&seq) else {
                continue;
            };
            let part = encode_field(&entry.field, &entry.value, limits.float_precision);
            // One byte for the comma and one for the final newline.
            if frame.len() + part.len() + 2 <= limits.maximum_packet_size {
                frame.push(',');
                frame.push_str(&part);
                build.fields += 1;
                self.remove(seq);
            } else if build.fields == 0 {
                warn!(
                    "Field {} ({} bytes) cannot fit in a {} byte frame, dropped",
                    entry.field,
                    part.len(),
                    limits.maximum_packet_size
                );
                self.remove(seq);
                build.discarded += 1;
            } else {
                break;
            }
        }

        if build.fields > 0 {
            frame.push('\n');
            build.frame = Some(frame);
        }
        build
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
