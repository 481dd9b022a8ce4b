/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Serial link abstraction.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::error::FramerError;

/// Byte sink the framer worker writes finished frames to.
#[async_trait]
pub trait FrameLink: Send {
    /// Write one complete frame.
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), FramerError>;

    /// Release the link at shutdown.
    async fn close(&mut self) -> Result<(), FramerError> {
        Ok(())
    }

    /// Human-readable target, for logs.
    fn describe(&self) -> String;
}

// ── Device ────────────────────────────────────────────────────────────────────

/// Character device (or capture file) opened on first write.
///
/// Line settings such as the baud rate are expected to be configured on the
/// device beforehand.  After a failed write the handle is dropped and the
/// next frame reopens the device.
pub struct DeviceLink {
    path: PathBuf,
    file: Option<File>,
}

impl DeviceLink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&mut self) -> Result<&mut File, FramerError> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|source| FramerError::LinkOpen {
                    device: self.path.clone(),
                    source,
                })?;
            info!("Opened downlink {}", self.path.display());
            self.file = Some(file);
        }
        self.file.as_mut().ok_or_else(|| FramerError::LinkOpen {
            device: self.path.clone(),
            source: std::io::Error::other("link handle missing after open"),
        })
    }
}

#[async_trait]
impl FrameLink for DeviceLink {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), FramerError> {
        let file = self.open().await?;
        let written = match file.write_all(frame).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            self.file = None;
            return Err(FramerError::LinkWrite(e));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FramerError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(FramerError::LinkWrite)?;
            debug!("Closed downlink {}", self.path.display());
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// Link that records frames in memory.  Clones share the same record, so a
/// test can keep one handle and give the other to the framer.
#[derive(Clone, Default)]
pub struct MemoryLink {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames written so far, lossily decoded.
    pub fn frames(&self) -> Vec<String> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrameLink for MemoryLink {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), FramerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FramerError::LinkWrite(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "link marked failing",
            )));
        }
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn device_link_appends_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tty");
        let mut link = DeviceLink::new(&path);

        link.write_frame(b"\"time\":1.0,\"a_x\":1\n").await.unwrap();
        link.write_frame(b"\"time\":2.0,\"a_x\":2\n").await.unwrap();
        link.close().await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "\"time\":1.0,\"a_x\":1\n\"time\":2.0,\"a_x\":2\n");
    }

    #[tokio::test]
    async fn device_link_open_failure_is_reported() {
        let mut link = DeviceLink::new("/nonexistent/dir/tty");
        let err = link.write_frame(b"x\n").await.unwrap_err();
        assert!(matches!(err, FramerError::LinkOpen { .. }));
    }

    #[tokio::test]
    async fn memory_link_shares_record_between_clones() {
        let record = MemoryLink::new();
        let mut link: Box<dyn FrameLink> = Box::new(record.clone());
        link.write_frame(b"a\n").await.unwrap();

        record.set_failing(true);
        assert!(link.write_frame(b"b\n").await.is_err());
        assert_eq!(record.frames(), vec!["a\n".to_string()]);
    }
}
