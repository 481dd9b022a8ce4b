/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Decode a captured downlink stream and check every frame.
//!
//! ```text
//! frame-dump --max-packet-size 250 capture.txt
//! cat /dev/ttyUSB0 | frame-dump
//! ```

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use greenhouse::clock::format_epoch;
use greenhouse::framer::parse_frame;

#[derive(Debug, Parser)]
#[command(name = "frame-dump", about = "Decode and validate downlink frames")]
struct Cli {
    /// Capture file; reads stdin when omitted.
    input: Option<PathBuf>,

    /// Flag frames longer than this many bytes (newline included).
    #[arg(short = 'm', long = "max-packet-size")]
    max_packet_size: Option<usize>,

    /// Only print the summary.
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,
}

#[derive(Debug, Default)]
struct Summary {
    frames: usize,
    fields: usize,
    bytes: usize,
    malformed: usize,
    oversize: usize,
}

async fn dump<R: AsyncBufRead + Unpin>(reader: R, cli: &Cli) -> Result<Summary> {
    let mut summary = Summary::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await.context("read failed")? {
        line_no += 1;
        if line.is_empty() {
            continue;
        }
        // `lines()` strips the terminator; the frame on the wire had one.
        let wire_len = line.len() + 1;
        summary.bytes += wire_len;

        if let Some(max) = cli.max_packet_size {
            if wire_len > max {
                warn!(line = line_no, "Frame is {} bytes, limit {}", wire_len, max);
                summary.oversize += 1;
            }
        }

        match parse_frame(&line) {
            Ok(frame) => {
                summary.frames += 1;
                summary.fields += frame.fields.len();
                if !cli.quiet {
                    println!("[{}] {} fields", format_epoch(frame.time), frame.fields.len());
                    for (name, value) in &frame.fields {
                        println!("    {name} = {value:?}");
                    }
                }
            }
            Err(e) => {
                error!(line = line_no, "{}", e);
                summary.malformed += 1;
            }
        }
    }
    Ok(summary)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let summary = match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("cannot open {}", path.display()))?;
            dump(BufReader::new(file), &cli).await?
        }
        None => dump(BufReader::new(tokio::io::stdin()), &cli).await?,
    };

    info!(
        frames = summary.frames,
        fields = summary.fields,
        bytes = summary.bytes,
        malformed = summary.malformed,
        oversize = summary.oversize,
        "Done"
    );
    if summary.malformed > 0 || summary.oversize > 0 {
        process::exit(1);
    }
    Ok(())
}
