/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Serial downlink framer.
//!
//! [`PacketFramer`] is a bus subscriber that batches telemetry into
//! size-bounded text frames and drains them over a rate-limited serial link.
//! It also owns the uplink drop directory, turning each file there into a
//! board command.
//!
//! ```text
//! publish_telemetry ──► receive_telemetry ──► PendingQueue ◄── worker (every 100 ms)
//!                        quantize + qualify     (Mutex)          │ evict stale
//!                                                                 │ build_frame
//!                                                                 ▼
//!                                                              FrameLink
//! ```
//!
//! The worker runs on its own tokio task from `setup` until the board's
//! shutdown token is cancelled.

pub mod encode;
pub mod error;
pub mod link;
pub mod queue;

pub use encode::{encode_field, format_float, parse_frame, quantize, ParsedFrame};
pub use error::FramerError;
pub use link::{DeviceLink, FrameLink, MemoryLink};
pub use queue::{FrameBuild, FrameLimits, PendingQueue};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::command::purge_directory;
use crate::config::FramerConfig;
use crate::module::{Context, MediaSink, Module, Resettable, StatusMap, TelemetrySink};
use crate::telemetry::{MediaEvent, TelemetryEvent, Value};

/// Poll interval of the worker loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `destroy` waits for the worker to close the link.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Running counters reported under `statistics` in the status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FramerStats {
    pub media_n: u64,
    pub media_bytes: u64,
    pub telemetry_discarded: u64,
    pub telemetry_messages: u64,
    pub telemetry_fields: u64,
    pub telemetry_bytes: u64,
}

impl FramerStats {
    pub fn total_bytes(&self) -> u64 {
        self.media_bytes + self.telemetry_bytes
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the module and its worker task.
struct Shared {
    queue: Mutex<PendingQueue>,
    stats: Mutex<FramerStats>,
    limits: FrameLimits,
    minimum_packet_delay: Duration,
    serial_timeout: Duration,
}

/// Downlink framer module.  See the [module docs](self).
pub struct PacketFramer {
    config: FramerConfig,
    shared: Arc<Shared>,
    /// Held until `setup` hands it to the worker.
    link: Mutex<Option<Box<dyn FrameLink>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PacketFramer {
    pub const NAME: &'static str = "framer";

    /// Framer writing to the configured serial device.
    pub fn new(config: FramerConfig) -> Self {
        let link = DeviceLink::new(config.device.clone());
        Self::with_link(config, Box::new(link))
    }

    /// Framer writing to an arbitrary link.
    pub fn with_link(config: FramerConfig, link: Box<dyn FrameLink>) -> Self {
        let shared = Shared {
            queue: Mutex::new(PendingQueue::new()),
            stats: Mutex::new(FramerStats::default()),
            limits: FrameLimits {
                maximum_packet_size: config.maximum_packet_size,
                data_timeout: config.data_timeout,
                float_precision: config.float_precision,
            },
            minimum_packet_delay: Duration::try_from_secs_f64(config.minimum_packet_delay)
                .unwrap_or_default(),
            serial_timeout: Duration::try_from_secs_f64(config.serial_timeout)
                .unwrap_or(Duration::from_secs(1)),
        };
        Self {
            config,
            shared: Arc::new(shared),
            link: Mutex::new(Some(link)),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FramerConfig {
        &self.config
    }

    pub fn stats(&self) -> FramerStats {
        *lock(&self.shared.stats)
    }

    /// Number of fields waiting for a frame.
    pub fn queued(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    /// Queue every field of `event` under `<origin>_<field>`.
    fn enqueue(&self, event: &TelemetryEvent) -> usize {
        let q = self.config.time_quantization;
        let mut queued = 0;
        let mut queue = lock(&self.shared.queue);
        for (field, value) in &event.fields {
            if field == encode::TIME_FIELD {
                continue;
            }
            let qualified = format!("{}_{}", event.origin.name(), field);
            if self.config.exclude_fields.contains(&qualified) {
                continue;
            }
            if let Value::Float(f) = value {
                if !f.is_finite() {
                    debug!("Skipping non-finite value for {}", qualified);
                    continue;
                }
            }
            queue.upsert(event.time, q, qualified, value.clone());
            queued += 1;
        }
        queued
    }

    /// Consume every command file in the drop directory.
    ///
    /// Each file is read and deleted before its command is dispatched, so a
    /// command runs at most once even if this update is aborted mid-way.
    async fn process_drop_directory(&self, ctx: &Context) -> Result<usize, FramerError> {
        let dir = &self.config.telecommand_directory;
        let drop_err = |source| FramerError::DropDirectory {
            path: dir.clone(),
            source,
        };

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await.map_err(drop_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(drop_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Dotfiles are still being written by the uplink.
            if name.starts_with('.') || !entry.file_type().await.map_err(drop_err)?.is_file() {
                continue;
            }
            files.push((name, entry.path()));
        }
        files.sort();

        for (name, path) in &files {
            let payload = match tokio::fs::read(path).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!("Cannot read command file {}: {}", path.display(), e);
                    continue;
                }
            };
            if let Err(e) = tokio::fs::remove_file(path).await {
                // Left in place it would be dispatched again on every update.
                error!("Cannot delete command file {}, not executed: {}", path.display(), e);
                continue;
            }
            ctx.board().dispatch(name, &payload).await;
        }
        Ok(files.len())
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

async fn run_worker(shared: Arc<Shared>, mut link: Box<dyn FrameLink>, shutdown: CancellationToken) {
    info!("Downlink worker started on {}", link.describe());
    let mut poll = interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_sent = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = poll.tick() => {}
        }

        if last_sent.elapsed() < shared.minimum_packet_delay {
            continue;
        }

        let build = {
            let mut queue = lock(&shared.queue);
            if queue.is_empty() {
                continue;
            }
            queue.build_frame(clock::now_or_zero(), &shared.limits)
        };
        if build.discarded > 0 {
            lock(&shared.stats).telemetry_discarded += build.discarded as u64;
        }
        let Some(frame) = build.frame else {
            continue;
        };

        info!("Write cmd {:?}", frame);
        match timeout(shared.serial_timeout, link.write_frame(frame.as_bytes())).await {
            Ok(Ok(())) => {
                let mut stats = lock(&shared.stats);
                stats.telemetry_messages += 1;
                stats.telemetry_fields += build.fields as u64;
                stats.telemetry_bytes += frame.len() as u64;
            }
            Ok(Err(e)) => error!("Frame lost: {}", e),
            Err(_) => error!("Frame lost: {}", FramerError::LinkTimeout(shared.serial_timeout)),
        }
        last_sent = Instant::now();
    }

    if let Err(e) = link.close().await {
        warn!("Closing downlink failed: {}", e);
    }
    debug!("Downlink worker stopped");
}

// ── Module ────────────────────────────────────────────────────────────────────

#[async_trait]
impl Module for PacketFramer {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn setup(&self, ctx: &Context) -> Result<()> {
        let tc = &self.config.telecommand_directory;
        info!("Creating directory for telecommands: {}", tc.display());
        tokio::fs::create_dir_all(tc)
            .await
            .with_context(|| format!("cannot create {}", tc.display()))?;
        tokio::fs::create_dir_all(&self.config.media_path)
            .await
            .with_context(|| format!("cannot create {}", self.config.media_path.display()))?;

        let link = lock(&self.link).take().ok_or(FramerError::AlreadyStarted)?;
        let handle = tokio::spawn(run_worker(
            Arc::clone(&self.shared),
            link,
            ctx.board().shutdown_token(),
        ));
        *lock(&self.worker) = Some(handle);
        Ok(())
    }

    async fn update(&self, t: f64, ctx: &Context) -> Result<()> {
        let dispatched = self.process_drop_directory(ctx).await?;
        if dispatched > 0 {
            debug!("Dispatched {} command files", dispatched);
        }

        // Own counters go to the downlink only, not to the bus.
        let discarded = self.stats().telemetry_discarded;
        self.enqueue(&ctx.telemetry(t).with("tm_discarded", discarded));
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            // The board cancels the shutdown token before the destroy pass.
            if timeout(WORKER_JOIN_TIMEOUT, handle).await.is_err() {
                warn!("Downlink worker did not stop in time");
            }
        }
        Ok(())
    }

    fn status(&self) -> StatusMap {
        let stats = self.stats();
        let mut statistics = serde_json::to_value(stats)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        statistics.insert("total_bytes".into(), json!(stats.total_bytes()));

        let mut map = StatusMap::new();
        map.insert("baudrate".into(), json!(self.config.baudrate));
        map.insert("device".into(), json!(absolute(&self.config.device)));
        map.insert("maximum_packet_size".into(), json!(self.config.maximum_packet_size));
        map.insert("minimum_packet_delay".into(), json!(self.config.minimum_packet_delay));
        map.insert("media_path".into(), json!(absolute(&self.config.media_path)));
        map.insert("time_quantization".into(), json!(self.config.time_quantization));
        map.insert("data_timeout".into(), json!(self.config.data_timeout));
        map.insert("serial_timeout".into(), json!(self.config.serial_timeout));
        map.insert(
            "telecommand_directory".into(),
            json!(absolute(&self.config.telecommand_directory)),
        );
        map.insert("queued".into(), json!(self.queued()));
        map.insert("statistics".into(), serde_json::Value::Object(statistics));
        map
    }

    fn as_telemetry_sink(&self) -> Option<&dyn TelemetrySink> {
        Some(self)
    }

    fn as_media_sink(&self) -> Option<&dyn MediaSink> {
        Some(self)
    }

    fn as_resettable(&self) -> Option<&dyn Resettable> {
        Some(self)
    }
}

fn absolute(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

impl TelemetrySink for PacketFramer {
    fn receive_telemetry(&self, event: &TelemetryEvent) -> Result<()> {
        let n = self.enqueue(event);
        debug!("Added {} items to data queue", n);
        Ok(())
    }
}

impl MediaSink for PacketFramer {
    fn receive_media(&self, event: &MediaEvent) -> Result<()> {
        let path: PathBuf = self
            .config
            .media_path
            .join(format!("{}_{}", event.origin.name(), event.name));
        debug!("Save media at {}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        std::fs::write(&path, &event.data)
            .with_context(|| format!("cannot write {}", path.display()))?;

        let mut stats = lock(&self.shared.stats);
        stats.media_n += 1;
        stats.media_bytes += event.data.len() as u64;
        Ok(())
    }
}

impl Resettable for PacketFramer {
    fn reset(&self) -> Result<()> {
        let removed = purge_directory(&self.config.media_path)
            .with_context(|| format!("cannot purge {}", self.config.media_path.display()))?;
        info!("Deleted {} media files", removed);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
