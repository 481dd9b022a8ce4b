/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Host health sensor: CPU temperature, load average and available RAM.
//!
//! Each source is read independently.  A source that is missing on this
//! host (no thermal zone in a container, say) is skipped for that sample.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::config::HostTelemetryConfig;
use crate::module::{Context, Module, StatusMap};
use crate::telemetry::Value;

const LOADAVG: &str = "/proc/loadavg";
const MEMINFO: &str = "/proc/meminfo";

/// Degrees Celsius from a thermal zone reading in millidegrees.
pub fn parse_thermal_zone(content: &str) -> Option<f64> {
    content.trim().parse::<f64>().ok().map(|m| m / 1000.0)
}

/// One-minute load average from `/proc/loadavg`.
pub fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

/// `MemAvailable` from `/proc/meminfo`, in MiB.
pub fn parse_mem_available(content: &str) -> Option<f64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix("MemAvailable:")?;
        let kib: f64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kib / 1024.0)
    })
}

pub struct HostTelemetryModule {
    thermal_zone: PathBuf,
    loadavg: PathBuf,
    meminfo: PathBuf,
    latest: Mutex<Vec<(String, Value)>>,
}

impl HostTelemetryModule {
    pub const NAME: &'static str = "internal";

    pub fn new(config: &HostTelemetryConfig) -> Self {
        Self::with_sources(config.thermal_zone.clone(), LOADAVG, MEMINFO)
    }

    /// Read from explicit files instead of `/proc`.
    pub fn with_sources(
        thermal_zone: impl Into<PathBuf>,
        loadavg: impl Into<PathBuf>,
        meminfo: impl Into<PathBuf>,
    ) -> Self {
        Self {
            thermal_zone: thermal_zone.into(),
            loadavg: loadavg.into(),
            meminfo: meminfo.into(),
            latest: Mutex::new(Vec::new()),
        }
    }

    /// Take one sample of every available source.
    pub async fn sample(&self) -> Vec<(String, Value)> {
        let sources: [(&str, &Path, fn(&str) -> Option<f64>); 3] = [
            ("cputemperature", &self.thermal_zone, parse_thermal_zone),
            ("cpuloadavg", &self.loadavg, parse_loadavg),
            ("ramusage", &self.meminfo, parse_mem_available),
        ];

        let mut fields = Vec::new();
        for (name, path, parse) in sources {
            match read(path).await.map(|c| parse(&c)) {
                Ok(Some(v)) => fields.push((name.to_owned(), Value::Float(v))),
                Ok(None) => debug!("Cannot parse {} from {}", name, path.display()),
                Err(e) => debug!("Skipping {}: {:#}", name, e),
            }
        }
        fields
    }
}

async fn read(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))
}

#[async_trait]
impl Module for HostTelemetryModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn update(&self, t: f64, ctx: &Context) -> Result<()> {
        let fields = self.sample().await;
        if fields.is_empty() {
            anyhow::bail!("no host health source is readable");
        }
        ctx.publish_telemetry(t, fields.iter().cloned());
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = fields;
        Ok(())
    }

    fn status(&self) -> StatusMap {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let data: serde_json::Map<_, _> = latest
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        let mut map = StatusMap::new();
        map.insert("latest_data".into(), serde_json::Value::Object(data));
        map
    }
}
