/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Remote command surface.
//!
//! Commands arrive as `(name, payload)` string pairs from any ingress path
//! (drop-directory files, a remote link).  [`Command::parse`] turns them into
//! a closed enum; [`Board::dispatch`](crate::board::Board::dispatch) executes
//! them and never lets a failure escape.
//!
//! | Name | Payload | Effect |
//! |---|---|---|
//! | `status` | path or empty | write JSON snapshot / publish it as media |
//! | `database` | path or empty | export the data store / publish it as media |
//! | `test` | ignored | run every module self-test |
//! | `reset` | ignored | purge media and state, restart the process |
//! | `quit` | seconds or empty | schedule shutdown; negative cancels |
//! | `abort_quit` | ignored | cancel a scheduled shutdown |
//! | `camera` | file name or empty | request one still |
//! | `video` | seconds or empty | request a recording |
//! | `debug_led_enable` | `on` / `off` / other | switch or toggle the debug LEDs |
//! | `shell` | script text | run it, capture stdout/stderr as media |

mod handlers;

pub(crate) use handlers::purge_directory;

use std::path::PathBuf;

use thiserror::Error;

/// Why a command could not be executed.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Could not find handler for {0}.")]
    Unknown(String),

    #[error("invalid payload for {command}: {reason} (payload \"{payload}\")")]
    InvalidPayload {
        command: &'static str,
        payload: String,
        reason: String,
    },

    /// The command targets a device collaborator that is not loaded or is
    /// disabled.
    #[error("no {0} module loaded")]
    MissingCollaborator(&'static str),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Argument of the `quit` command.
#[derive(Debug, Clone, PartialEq)]
pub enum QuitRequest {
    /// Shut down this many seconds from now.
    In(f64),
    /// Cancel a scheduled shutdown (negative delay).
    Cancel,
    /// Payload was not a number; handled like a cancel.
    Unparsable(String),
}

/// Argument of the `debug_led_enable` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedSwitch {
    On,
    Off,
    Toggle,
}

impl LedSwitch {
    fn parse(payload: &str) -> Self {
        match payload.trim().to_lowercase().as_str() {
            "1" | "true" | "on" => LedSwitch::On,
            "0" | "false" | "off" => LedSwitch::Off,
            _ => LedSwitch::Toggle,
        }
    }
}

/// A parsed command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status(Option<PathBuf>),
    Database(Option<PathBuf>),
    Test,
    Reset,
    Quit(QuitRequest),
    AbortQuit,
    Camera(Option<String>),
    Video(Option<f64>),
    DebugLed(LedSwitch),
    Shell(String),
}

fn optional(payload: &str) -> Option<&str> {
    let trimmed = payload.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

impl Command {
    /// Parse a command name (case-insensitive) and its payload.
    pub fn parse(name: &str, payload: &str) -> Result<Self, CommandError> {
        let command = match name.trim().to_lowercase().as_str() {
            "status" => Command::Status(optional(payload).map(PathBuf::from)),
            "database" => Command::Database(optional(payload).map(PathBuf::from)),
            "test" => Command::Test,
            "reset" => Command::Reset,
            "quit" => Command::Quit(match optional(payload) {
                None => QuitRequest::In(0.0),
                Some(s) => match s.parse::<f64>() {
                    Ok(v) if v.is_nan() => QuitRequest::Unparsable(s.to_owned()),
                    Ok(v) if v < 0.0 => QuitRequest::Cancel,
                    Ok(v) => QuitRequest::In(v),
                    Err(_) => QuitRequest::Unparsable(s.to_owned()),
                },
            }),
            "abort_quit" => Command::AbortQuit,
            "camera" => Command::Camera(optional(payload).map(str::to_owned)),
            "video" => Command::Video(match optional(payload) {
                None => None,
                Some(s) => match s.parse::<f64>() {
                    Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
                    Ok(_) => {
                        return Err(CommandError::InvalidPayload {
                            command: "video",
                            payload: payload.to_owned(),
                            reason: "duration must be a non-negative number".into(),
                        })
                    }
                    Err(e) => {
                        return Err(CommandError::InvalidPayload {
                            command: "video",
                            payload: payload.to_owned(),
                            reason: e.to_string(),
                        })
                    }
                },
            }),
            "debug_led_enable" => Command::DebugLed(LedSwitch::parse(payload)),
            "shell" => Command::Shell(payload.to_owned()),
            other => return Err(CommandError::Unknown(other.to_owned())),
        };
        Ok(command)
    }

    /// Canonical (lower-case) command name.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Status(_) => "status",
            Command::Database(_) => "database",
            Command::Test => "test",
            Command::Reset => "reset",
            Command::Quit(_) => "quit",
            Command::AbortQuit => "abort_quit",
            Command::Camera(_) => "camera",
            Command::Video(_) => "video",
            Command::DebugLed(_) => "debug_led_enable",
            Command::Shell(_) => "shell",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
