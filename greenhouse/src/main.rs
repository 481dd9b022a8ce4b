/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{error, info, warn};

use greenhouse::board::{Board, RunOutcome};
use greenhouse::config::PayloadConfig;
use greenhouse::framer::PacketFramer;
use greenhouse::modules::{
    HeartbeatModule, HostTelemetryModule, LevelOutput, RemoteStatusModule, TimelineOutput,
};
use greenhouse::timeline::Timeline;

/// Exit code asking the service supervisor for a restart (`reset` command).
const EXIT_RESTART: i32 = 3;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Greenhouse payload orchestrator.
///
/// Example:
///   greenhouse --config /etc/greenhouse/payload.yaml --multithreading
#[derive(Debug, Parser)]
#[command(
    name = "greenhouse",
    about = "Greenhouse payload orchestrator – module scheduler and serial downlink",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML payload configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Run module updates concurrently, overriding the configuration.
    #[arg(short = 'm', long = "multithreading", default_value_t = false)]
    multithreading: bool,

    /// Log level used when RUST_LOG is not set.
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: String,
}

// ── Wiring ────────────────────────────────────────────────────────────────────

fn build_board(config: PayloadConfig) -> Result<Board> {
    let mut builder = Board::builder(config.board);

    if let Some(framer) = config.framer {
        let frequency = framer.update_frequency;
        builder = builder.register(Arc::new(PacketFramer::new(framer)), frequency);
    }
    if let Some(heartbeat) = config.heartbeat {
        builder = builder.register(Arc::new(HeartbeatModule::unwired()), heartbeat.update_frequency);
    }
    if let Some(host) = config.host_telemetry {
        builder = builder.register(Arc::new(HostTelemetryModule::new(&host)), host.update_frequency);
    }
    if let Some(remote) = config.remote_status {
        let module = RemoteStatusModule::new(&remote).context("invalid remote_status section")?;
        builder = builder.register(Arc::new(module), remote.update_frequency);
    }
    for (name, output) in config.outputs {
        let timeline = Timeline::new(output.timeline)
            .with_context(|| format!("invalid timeline for output `{name}`"))?;
        // PWM drivers are external; the board only tracks the commanded level.
        let module = TimelineOutput::new(name, timeline, Box::new(LevelOutput::new()));
        builder = builder.register(Arc::new(module), output.update_frequency);
    }

    Ok(builder.build()?)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Level is controlled by the RUST_LOG env-var, falling back to --log-level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    info!("Greenhouse starting up...");

    // ── Load configuration ────────────────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => match PayloadConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load payload configuration: {:#}", e);
                process::exit(1);
            }
        },
        None => {
            warn!("No configuration file provided, using default settings");
            PayloadConfig::default()
        }
    };
    if cli.multithreading {
        config.board.multi_threading = true;
    }

    let board = match build_board(config) {
        Ok(board) => board,
        Err(e) => {
            error!("Failed to build board: {:#}", e);
            process::exit(1);
        }
    };

    // ── Run ───────────────────────────────────────────────────────────────────
    let signal_board = board.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Signal received");
        signal_board.shutdown();
    });

    match board.run().await {
        Ok(RunOutcome::Finished) => info!("Greenhouse stopped"),
        Ok(RunOutcome::RestartRequested) => {
            info!("Restart requested, exiting with code {}", EXIT_RESTART);
            process::exit(EXIT_RESTART);
        }
        Err(e) => {
            error!("Board failed: {}", e);
            process::exit(1);
        }
    }
}
