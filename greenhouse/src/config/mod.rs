//! Payload configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! cycle_delay: 0.01          # s, pause at the end of every tick
//! update_timeout: 10         # s, watchdog deadline per module update
//! multi_threading: false     # run module updates concurrently
//! data_location: ./data
//! reset_purge: [/download]   # directories emptied by the `reset` command
//!
//! framer:
//!   update_frequency: 1
//!   device: /dev/ttyAMA0
//!   baudrate: 115200
//!   maximum_packet_size: 250
//!   minimum_packet_delay: 1.0
//!   media_path: /download
//!   time_quantization: 1
//!   data_timeout: 60
//!   serial_timeout: 1
//!   telecommand_directory: /upload
//!   float_precision: 3
//!
//! heartbeat:
//!   update_frequency: 1
//!
//! host_telemetry:
//!   update_frequency: 30
//!
//! remote_status:
//!   update_frequency: 10
//!   root_url: ground.local:8000
//!   device_id: greenhouse-1  # default: host name
//!   timeout: 2
//!
//! outputs:
//!   light:
//!     update_frequency: 30
//!     timeline:
//!       - { duration: 57600, value: 1.0 }
//!       - { duration: 28800, value: 0.0 }
//! ```
//!
//! Every key is optional.  Module sections that are absent simply mean the
//! module is not loaded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::timeline::Segment;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PayloadConfigFile {
    #[serde(default = "default_cycle_delay")]
    cycle_delay: f64,
    #[serde(default = "default_update_timeout")]
    update_timeout: f64,
    #[serde(default)]
    multi_threading: bool,
    #[serde(default = "default_data_location")]
    data_location: PathBuf,
    #[serde(default)]
    reset_purge: Vec<PathBuf>,
    framer: Option<FramerConfig>,
    heartbeat: Option<HeartbeatConfig>,
    host_telemetry: Option<HostTelemetryConfig>,
    remote_status: Option<RemoteStatusConfig>,
    #[serde(default)]
    outputs: BTreeMap<String, OutputConfig>,
}

fn default_cycle_delay() -> f64 {
    0.01
}

fn default_update_timeout() -> f64 {
    10.0
}

fn default_data_location() -> PathBuf {
    PathBuf::from("./data")
}

// ── Public data structures ────────────────────────────────────────────────────

/// Board-level settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardSettings {
    /// Pause at the end of each tick, bounding CPU usage.
    pub cycle_delay: Duration,
    /// Watchdog deadline for a single module update.
    pub update_timeout: Duration,
    /// `true` runs each due update on its own task without waiting for it.
    pub multi_threading: bool,
    /// Root for board-owned files (shell scripts and their captures).
    pub data_location: PathBuf,
    /// Directories whose plain files are deleted by the `reset` command.
    pub reset_purge: Vec<PathBuf>,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            cycle_delay: Duration::from_secs_f64(default_cycle_delay()),
            update_timeout: Duration::from_secs_f64(default_update_timeout()),
            multi_threading: false,
            data_location: default_data_location(),
            reset_purge: Vec::new(),
        }
    }
}

/// Serial downlink framer settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FramerConfig {
    #[serde(default = "default_framer_frequency")]
    pub update_frequency: f64,
    /// Serial device the frames are written to.
    pub device: PathBuf,
    /// Reported in status only; line settings are applied by the system.
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    /// Upper bound on one frame in bytes, newline included.
    pub maximum_packet_size: usize,
    /// Minimum pause between two frames, in seconds.
    pub minimum_packet_delay: f64,
    /// Where received media is stored for downlink.
    pub media_path: PathBuf,
    /// Telemetry timestamps are floored to a multiple of this, in seconds.
    #[serde(default = "default_quantization")]
    pub time_quantization: f64,
    /// Queued telemetry older than this many seconds is discarded.
    pub data_timeout: f64,
    /// Deadline for writing one frame, in seconds.
    #[serde(default = "default_serial_timeout")]
    pub serial_timeout: f64,
    /// Drop directory scanned for command files.
    pub telecommand_directory: PathBuf,
    #[serde(default = "default_float_precision")]
    pub float_precision: usize,
    /// Qualified field names (`<module>_<field>`) that are never queued.
    #[serde(default)]
    pub exclude_fields: Vec<String>,
}

fn default_framer_frequency() -> f64 {
    1.0
}

fn default_baudrate() -> u32 {
    115_200
}

fn default_quantization() -> f64 {
    1.0
}

fn default_serial_timeout() -> f64 {
    1.0
}

fn default_float_precision() -> usize {
    3
}

/// Heartbeat / debug LED module settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_frequency")]
    pub update_frequency: f64,
}

fn default_heartbeat_frequency() -> f64 {
    1.0
}

/// Host health sensor settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostTelemetryConfig {
    #[serde(default = "default_host_frequency")]
    pub update_frequency: f64,
    #[serde(default = "default_thermal_zone")]
    pub thermal_zone: PathBuf,
}

fn default_host_frequency() -> f64 {
    30.0
}

fn default_thermal_zone() -> PathBuf {
    PathBuf::from("/sys/class/thermal/thermal_zone0/temp")
}

/// HTTP status/command link to a ground station.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteStatusConfig {
    #[serde(default = "default_remote_frequency")]
    pub update_frequency: f64,
    /// `host:port` or a full `http://` URL.
    pub root_url: String,
    /// Path segment identifying this payload; the host name when absent.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Request deadline in seconds.  Media uploads get twice as long.
    #[serde(default = "default_remote_timeout")]
    pub timeout: f64,
}

fn default_remote_frequency() -> f64 {
    10.0
}

fn default_remote_timeout() -> f64 {
    2.0
}

/// One timeline-driven duty-cycle output (fan, light).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_frequency")]
    pub update_frequency: f64,
    pub timeline: Vec<Segment<f64>>,
}

fn default_output_frequency() -> f64 {
    10.0
}

/// Complete payload configuration.
#[derive(Debug, Clone, Default)]
pub struct PayloadConfig {
    pub board: BoardSettings,
    pub framer: Option<FramerConfig>,
    pub heartbeat: Option<HeartbeatConfig>,
    pub host_telemetry: Option<HostTelemetryConfig>,
    pub remote_status: Option<RemoteStatusConfig>,
    /// Output name → settings, sorted by name for deterministic registration.
    pub outputs: BTreeMap<String, OutputConfig>,
}

impl PayloadConfig {
    /// Parse `path` into a [`PayloadConfig`].
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is structurally
    /// invalid, or a duration is negative or not finite.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading payload configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))
    }

    /// Parse a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: PayloadConfigFile =
            serde_yaml::from_str(content).context("Failed to parse YAML")?;

        let board = BoardSettings {
            cycle_delay: seconds("cycle_delay", file.cycle_delay)?,
            update_timeout: seconds("update_timeout", file.update_timeout)?,
            multi_threading: file.multi_threading,
            data_location: file.data_location,
            reset_purge: file.reset_purge,
        };

        if let Some(framer) = &file.framer {
            validate_framer(framer)?;
        }
        if let Some(remote) = &file.remote_status {
            seconds("remote_status.timeout", remote.timeout)?;
        }

        debug!(
            cycle_delay = ?board.cycle_delay,
            update_timeout = ?board.update_timeout,
            multi_threading = board.multi_threading,
            data_location = %board.data_location.display(),
            "Board settings"
        );

        let config = Self {
            board,
            framer: file.framer,
            heartbeat: file.heartbeat,
            host_telemetry: file.host_telemetry,
            remote_status: file.remote_status,
            outputs: file.outputs,
        };

        if config.module_count() == 0 {
            warn!("Configuration loads no modules");
        }
        Ok(config)
    }

    /// Number of modules this configuration loads.
    pub fn module_count(&self) -> usize {
        usize::from(self.framer.is_some())
            + usize::from(self.heartbeat.is_some())
            + usize::from(self.host_telemetry.is_some())
            + usize::from(self.remote_status.is_some())
            + self.outputs.len()
    }
}

fn seconds(key: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("`{key}` must be a finite, non-negative number of seconds (got {value})"))
}

fn validate_framer(cfg: &FramerConfig) -> Result<()> {
    if cfg.time_quantization <= 0.0 || !cfg.time_quantization.is_finite() {
        bail!(
            "`framer.time_quantization` must be positive (got {})",
            cfg.time_quantization
        );
    }
    if cfg.maximum_packet_size == 0 {
        bail!("`framer.maximum_packet_size` must be positive");
    }
    seconds("framer.minimum_packet_delay", cfg.minimum_packet_delay)?;
    seconds("framer.data_timeout", cfg.data_timeout)?;
    seconds("framer.serial_timeout", cfg.serial_timeout)?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
