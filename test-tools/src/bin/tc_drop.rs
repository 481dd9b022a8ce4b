/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Drop one command file into the framer's telecommand directory.
//!
//! ```text
//! tc-drop --dir /upload quit 3600
//! tc-drop --dir /upload shell --payload-file sample.sh
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "tc-drop", about = "Write a command file into the framer drop directory")]
struct Cli {
    /// Telecommand drop directory watched by the framer.
    #[arg(short = 'd', long = "dir", default_value = "/upload")]
    dir: PathBuf,

    /// Command name (file name), e.g. `status`, `quit`, `shell`.
    command: String,

    /// Inline payload (file content).
    payload: Option<String>,

    /// Read the payload from a file instead.
    #[arg(short = 'f', long = "payload-file", conflicts_with = "payload")]
    payload_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.command.is_empty() || cli.command.contains(['/', '\\']) || cli.command.starts_with('.') {
        bail!("invalid command name `{}`", cli.command);
    }

    let payload = match (&cli.payload, &cli.payload_file) {
        (Some(p), _) => p.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?,
        (None, None) => String::new(),
    };

    tokio::fs::create_dir_all(&cli.dir)
        .await
        .with_context(|| format!("cannot create {}", cli.dir.display()))?;

    let staging = cli.dir.join(format!(".{}.tmp", cli.command));
    let target = cli.dir.join(&cli.command);
    tokio::fs::write(&staging, payload.as_bytes())
        .await
        .with_context(|| format!("cannot write {}", staging.display()))?;
    tokio::fs::rename(&staging, &target)
        .await
        .with_context(|| format!("cannot move command into {}", target.display()))?;

    info!(
        command = %cli.command,
        bytes = payload.len(),
        "Dropped {}",
        target.display()
    );
    Ok(())
}
