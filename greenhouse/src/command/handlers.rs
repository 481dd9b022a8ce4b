/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Board-side command handlers.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tracing::{debug, error, info, warn};

use super::{Command, CommandError, LedSwitch, QuitRequest};
use crate::board::{watchdog, Board};
use crate::clock;
use crate::module::{Camera, DataStore, DebugIndicator, Module};
use crate::telemetry::MediaEvent;

impl Board {
    /// Parse and execute one remote command.
    ///
    /// Never fails: unknown names, handler errors and handler panics are
    /// logged.  Returns `true` when the handler completed.
    ///
    /// The handler runs on its own task.  If the caller is cancelled (a
    /// watchdog abort of the update that received the command) the command
    /// still runs to completion.
    pub async fn dispatch(&self, name: &str, payload: &str) -> bool {
        let command = match Command::parse(name, payload) {
            Ok(command) => command,
            Err(CommandError::Unknown(name)) => {
                error!("Could not find handler for {}.", name);
                return false;
            }
            Err(e) => {
                error!("Executing {} failed with data \"{}\": {}", name, payload, e);
                return false;
            }
        };

        info!("Received command: {}", command.name());
        let command_name = command.name();
        let board = self.clone();
        let outcome = tokio::spawn(async move { board.execute(command).await }).await;
        let result = match outcome {
            Ok(result) => result,
            Err(join_err) => {
                error!(
                    command = command_name,
                    "Executing {} panicked with data \"{}\": {}",
                    command_name,
                    payload,
                    watchdog::panic_message(join_err)
                );
                return false;
            }
        };
        match result {
            Ok(()) => true,
            Err(CommandError::MissingCollaborator(what)) => {
                warn!(command = command_name, "No {} module loaded", what);
                false
            }
            Err(e) => {
                error!(
                    command = command_name,
                    "Executing {} failed with data \"{}\": {:#}", command_name, payload, e
                );
                false
            }
        }
    }

    /// Execute an already parsed command.
    pub async fn execute(&self, command: Command) -> Result<(), CommandError> {
        match command {
            Command::Status(path) => self.export_status(path).await,
            Command::Database(path) => self.export_database(path).await,
            Command::Test => {
                self.run_self_tests().await;
                Ok(())
            }
            Command::Reset => {
                self.reset_all().await;
                Ok(())
            }
            Command::Quit(request) => {
                self.schedule_quit(request)?;
                Ok(())
            }
            Command::AbortQuit => {
                self.set_quit_time(None);
                warn!("Shutdown aborted!");
                Ok(())
            }
            Command::Camera(file_name) => self.request_image(file_name),
            Command::Video(duration) => self.request_video(duration),
            Command::DebugLed(switch) => {
                let indicator = self
                    .collaborator(|m| m.as_indicator())
                    .ok_or(CommandError::MissingCollaborator("debug indicator"))?;
                match switch {
                    LedSwitch::On => indicator.set_enabled(true),
                    LedSwitch::Off => indicator.set_enabled(false),
                    LedSwitch::Toggle => indicator.toggle(),
                }
                debug!(enabled = indicator.is_enabled(), "Debug LEDs switched");
                Ok(())
            }
            Command::Shell(script) => self.run_shell(&script).await,
        }
    }

    /// First enabled module offering the capability `pick` selects.
    fn collaborator<'a, T: ?Sized + 'a>(
        &'a self,
        pick: impl Fn(&'a dyn Module) -> Option<&'a T>,
    ) -> Option<&'a T> {
        self.slots()
            .iter()
            .filter(|slot| slot.is_enabled())
            .find_map(|slot| pick(slot.module().as_ref()))
    }

    fn publish_board_media(&self, name: String, data: Vec<u8>) -> usize {
        let delivered = self.publish_media(&MediaEvent::new(self.origin().clone(), name, data));
        if delivered == 0 {
            warn!("No media sink accepted the export");
        }
        delivered
    }

    // ── status / database ─────────────────────────────────────────────────────

    async fn export_status(&self, path: Option<PathBuf>) -> Result<(), CommandError> {
        let json = serde_json::to_vec_pretty(&self.status_snapshot())
            .context("cannot serialize status snapshot")?;
        match path {
            Some(path) => {
                info!("Save current status at {}.", path.display());
                write_creating_parent(&path, &json).await?;
            }
            None => {
                let name = format!("status_{}.json", clock::file_stamp());
                info!("Publishing current status as {}", name);
                self.publish_board_media(name, json);
            }
        }
        Ok(())
    }

    async fn export_database(&self, path: Option<PathBuf>) -> Result<(), CommandError> {
        let store: &dyn DataStore = self
            .collaborator(|m| m.as_data_store())
            .ok_or(CommandError::MissingCollaborator("database"))?;
        match path {
            Some(path) => {
                info!("DATA DB: {}", path.display());
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("cannot create {}", parent.display()))?;
                }
                store.export_to(&path)?;
            }
            None => {
                let name = format!("db_{}.sqlite", clock::file_stamp());
                info!("DATA DB: publishing as {}", name);
                let bytes = store.export_bytes()?;
                self.publish_board_media(name, bytes);
            }
        }
        Ok(())
    }

    // ── test / reset ──────────────────────────────────────────────────────────

    async fn run_self_tests(&self) {
        for slot in self.slots() {
            if slot.module().as_testable().is_none() {
                continue;
            }
            let module = Arc::clone(slot.module());
            let result = watchdog::isolate(async move {
                match module.as_testable() {
                    Some(testable) => testable.test().await,
                    None => Ok(()),
                }
            })
            .await;
            match result {
                Ok(()) => info!(module = %slot.name(), "Self-test passed"),
                Err(e) => error!(module = %slot.name(), "Self-test failed: {:#}", e),
            }
        }
    }

    async fn reset_all(&self) {
        for slot in self.slots() {
            if let Some(resettable) = slot.module().as_resettable() {
                if let Err(e) = resettable.reset() {
                    debug!(module = %slot.name(), "Reset failed: {:#}", e);
                }
            }
        }
        for dir in &self.settings().reset_purge {
            match purge_directory(dir) {
                Ok(n) => info!("Purged {} files from {}", n, dir.display()),
                Err(e) => warn!("Cannot purge {}: {}", dir.display(), e),
            }
        }
        warn!("Reset complete, restarting");
        self.request_restart();
    }

    // ── quit ──────────────────────────────────────────────────────────────────

    fn schedule_quit(&self, request: QuitRequest) -> Result<(), CommandError> {
        match request {
            QuitRequest::In(delay) => {
                let quit_time = clock::now().context("cannot schedule shutdown")? + delay;
                warn!(
                    "Shutdown scheduled in {} seconds ({})!",
                    delay,
                    clock::format_epoch(quit_time)
                );
                self.set_quit_time(Some(quit_time));
            }
            QuitRequest::Cancel => {
                self.set_quit_time(None);
                warn!("Shutdown aborted!");
            }
            QuitRequest::Unparsable(payload) => {
                self.set_quit_time(None);
                warn!(
                    "Could not interpret data as float. Shutdown aborted! ({})",
                    payload
                );
            }
        }
        Ok(())
    }

    // ── camera / video ────────────────────────────────────────────────────────

    fn camera(&self) -> Result<&dyn Camera, CommandError> {
        self.collaborator(|m| m.as_camera())
            .ok_or(CommandError::MissingCollaborator("camera"))
    }

    fn request_image(&self, file_name: Option<String>) -> Result<(), CommandError> {
        let camera = self.camera()?;
        let file_name = image_file_name(file_name, camera.file_extension(), clock::now_or_zero());
        info!("Requesting image {}", file_name);
        camera.request_image(file_name);
        Ok(())
    }

    fn request_video(&self, duration: Option<f64>) -> Result<(), CommandError> {
        let camera = self.camera()?;
        let duration = duration.unwrap_or_else(|| camera.min_video_duration());
        let until = clock::now().context("cannot schedule video")? + duration;
        info!("Recording video for {} seconds", duration);
        camera.request_video(until);
        Ok(())
    }

    // ── shell ─────────────────────────────────────────────────────────────────

    async fn run_shell(&self, script: &str) -> Result<(), CommandError> {
        let dir = self.settings().data_location.join("shell");
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("cannot create {}", dir.display()))?;

        let file_name = format!("shell_{}.sh", clock::file_stamp());
        let script_path = std::path::absolute(dir.join(&file_name))
            .context("cannot resolve script path")?;
        tokio::fs::write(&script_path, script)
            .await
            .with_context(|| format!("cannot write {}", script_path.display()))?;

        let output = tokio::process::Command::new("sh")
            .arg(&script_path)
            .kill_on_drop(true)
            .output()
            .await
            .context("cannot run sh")?;
        info!(status = %output.status, "Shell script {} finished", file_name);

        self.publish_board_media(file_name.clone(), script.as_bytes().to_vec());
        self.publish_board_media(format!("{file_name}.stdout"), output.stdout);
        self.publish_board_media(format!("{file_name}.stderr"), output.stderr);
        Ok(())
    }
}

/// Name for a requested still: the payload with the camera's extension
/// appended when missing, or the timestamp with `_` for the decimal point.
fn image_file_name(requested: Option<String>, extension: &str, now: f64) -> String {
    match requested {
        Some(name) if name.ends_with(extension) => name,
        Some(name) => format!("{name}.{extension}"),
        None => format!("{}.{extension}", format!("{now:.3}").replace('.', "_")),
    }
}

async fn write_creating_parent(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("cannot write {}", path.display()))
}

/// Delete the plain files directly inside `dir`.  Subdirectories are kept.
///
/// Returns the number of files removed.  A missing directory counts as empty.
pub(crate) fn purge_directory(dir: &Path) -> io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use crate::board::GitIdentity;
    use crate::config::BoardSettings;
    use crate::module::{Context, MediaSink, Resettable, Testable};

    /// Collects media and plays every device collaborator.
    #[derive(Default)]
    struct Bench {
        media: Mutex<Vec<(String, String, Vec<u8>)>>,
        image: Mutex<Option<String>>,
        video_until: Mutex<Option<f64>>,
        led: AtomicBool,
        broken_camera: AtomicBool,
        tested: AtomicUsize,
        reset: AtomicUsize,
    }

    #[async_trait]
    impl Module for Bench {
        fn name(&self) -> &str {
            "bench"
        }
        async fn update(&self, _t: f64, _ctx: &Context) -> Result<()> {
            Ok(())
        }
        fn as_media_sink(&self) -> Option<&dyn MediaSink> {
            Some(self)
        }
        fn as_camera(&self) -> Option<&dyn Camera> {
            Some(self)
        }
        fn as_indicator(&self) -> Option<&dyn DebugIndicator> {
            Some(self)
        }
        fn as_testable(&self) -> Option<&dyn Testable> {
            Some(self)
        }
        fn as_resettable(&self) -> Option<&dyn Resettable> {
            Some(self)
        }
    }

    impl MediaSink for Bench {
        fn receive_media(&self, event: &MediaEvent) -> Result<()> {
            self.media.lock().unwrap().push((
                event.origin.name().to_owned(),
                event.name.clone(),
                event.data.clone(),
            ));
            Ok(())
        }
    }

    impl Camera for Bench {
        fn file_extension(&self) -> &str {
            "jpg"
        }
        fn min_video_duration(&self) -> f64 {
            30.0
        }
        fn request_image(&self, file_name: String) {
            if self.broken_camera.load(Ordering::SeqCst) {
                panic!("camera driver crashed");
            }
            *self.image.lock().unwrap() = Some(file_name);
        }
        fn request_video(&self, until: f64) {
            *self.video_until.lock().unwrap() = Some(until);
        }
    }

    impl DebugIndicator for Bench {
        fn set_enabled(&self, on: bool) {
            self.led.store(on, Ordering::SeqCst);
        }
        fn toggle(&self) {
            self.led.fetch_xor(true, Ordering::SeqCst);
        }
        fn is_enabled(&self) -> bool {
            self.led.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Testable for Bench {
        async fn test(&self) -> Result<()> {
            self.tested.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Resettable for Bench {
        fn reset(&self) -> Result<()> {
            self.reset.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("nothing to reset")
        }
    }

    /// Data store backed by one file on disk.
    struct Archive {
        path: PathBuf,
    }

    #[async_trait]
    impl Module for Archive {
        fn name(&self) -> &str {
            "archive"
        }
        async fn update(&self, _t: f64, _ctx: &Context) -> Result<()> {
            Ok(())
        }
        fn as_data_store(&self) -> Option<&dyn DataStore> {
            Some(self)
        }
    }

    impl DataStore for Archive {
        fn export_to(&self, dest: &Path) -> Result<()> {
            std::fs::copy(&self.path, dest)?;
            Ok(())
        }
        fn export_bytes(&self) -> Result<Vec<u8>> {
            Ok(std::fs::read(&self.path)?)
        }
    }

    fn board_with_archive(dir: &Path, bench: Arc<Bench>) -> Board {
        let db = dir.join("telemetry.sqlite");
        std::fs::write(&db, b"SQLite format 3\0rows").unwrap();
        let settings = BoardSettings {
            data_location: dir.join("data"),
            ..BoardSettings::default()
        };
        Board::builder(settings)
            .register(bench, 1.0)
            .register(Arc::new(Archive { path: db }), 1.0)
            .git_identity(GitIdentity::unknown())
            .build()
            .unwrap()
    }

    fn board_with(dir: &Path, bench: Arc<Bench>) -> Board {
        let settings = BoardSettings {
            data_location: dir.join("data"),
            reset_purge: vec![dir.join("download")],
            ..BoardSettings::default()
        };
        Board::builder(settings)
            .register(bench, 1.0)
            .git_identity(GitIdentity::unknown())
            .build()
            .unwrap()
    }

    fn setup() -> (tempfile::TempDir, Arc<Bench>, Board) {
        let dir = tempfile::tempdir().unwrap();
        let bench = Arc::new(Bench::default());
        let board = board_with(dir.path(), Arc::clone(&bench));
        (dir, bench, board)
    }

    // ── routing ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_command_is_a_logged_noop() {
        let (_dir, _bench, board) = setup();
        assert!(!board.dispatch("fly", "").await);
        assert!(board.is_running());
    }

    #[tokio::test]
    async fn missing_collaborator_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let settings = BoardSettings {
            data_location: dir.path().join("data"),
            ..BoardSettings::default()
        };
        let board = Board::builder(settings)
            .git_identity(GitIdentity::unknown())
            .build()
            .unwrap();
        assert!(!board.dispatch("camera", "").await);
        assert!(matches!(
            board.execute(Command::Video(None)).await,
            Err(CommandError::MissingCollaborator("camera"))
        ));
    }

    #[tokio::test]
    async fn disabled_collaborator_is_ignored() {
        let (_dir, _bench, board) = setup();
        board.find("bench").unwrap().set_enabled(false);
        assert!(!board.dispatch("debug_led_enable", "on").await);
    }

    // ── quit ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn quit_schedules_and_negative_cancels() {
        let (_dir, _bench, board) = setup();
        let before = clock::now().unwrap();
        assert!(board.dispatch("QUIT", "60").await);
        let quit_time = board.quit_time().unwrap();
        assert!(quit_time >= before + 60.0 && quit_time < before + 70.0);

        assert!(board.dispatch("quit", "-5").await);
        assert_eq!(board.quit_time(), None);
    }

    #[tokio::test]
    async fn unparsable_quit_cancels() {
        let (_dir, _bench, board) = setup();
        board.set_quit_time(Some(1.0));
        assert!(board.dispatch("quit", "later").await);
        assert_eq!(board.quit_time(), None);
    }

    #[tokio::test]
    async fn abort_quit_clears() {
        let (_dir, _bench, board) = setup();
        board.dispatch("quit", "").await;
        assert!(board.quit_time().is_some());
        board.dispatch("abort_quit", "").await;
        assert_eq!(board.quit_time(), None);
    }

    // ── devices ───────────────────────────────────────────────────────────────

    #[test]
    fn image_names() {
        assert_eq!(image_file_name(Some("a.jpg".into()), "jpg", 0.0), "a.jpg");
        assert_eq!(image_file_name(Some("a".into()), "jpg", 0.0), "a.jpg");
        assert_eq!(image_file_name(None, "jpg", 1234.5), "1234_500.jpg");
    }

    #[tokio::test]
    async fn camera_and_video_requests_reach_the_camera() {
        let (_dir, bench, board) = setup();
        assert!(board.dispatch("camera", "plant").await);
        assert_eq!(bench.image.lock().unwrap().as_deref(), Some("plant.jpg"));

        let before = clock::now().unwrap();
        assert!(board.dispatch("video", "").await);
        let until = bench.video_until.lock().unwrap().unwrap();
        assert!(until >= before + 30.0);

        assert!(!board.dispatch("video", "long").await);
    }

    #[tokio::test]
    async fn panicking_collaborator_is_contained() {
        let (_dir, bench, board) = setup();
        bench.broken_camera.store(true, Ordering::SeqCst);

        assert!(!board.dispatch("camera", "plant").await);
        assert!(bench.image.lock().unwrap().is_none());

        // The router keeps working after the panic.
        assert!(board.dispatch("debug_led_enable", "on").await);
        assert!(bench.is_enabled());
        assert!(board.is_running());
    }

    #[tokio::test]
    async fn debug_led_switching() {
        let (_dir, bench, board) = setup();
        board.dispatch("debug_led_enable", "on").await;
        assert!(bench.is_enabled());
        board.dispatch("debug_led_enable", "toggle").await;
        assert!(!bench.is_enabled());
        board.dispatch("debug_led_enable", "").await;
        assert!(bench.is_enabled());
        board.dispatch("debug_led_enable", "0").await;
        assert!(!bench.is_enabled());
    }

    // ── status / test / reset ─────────────────────────────────────────────────

    #[tokio::test]
    async fn status_to_path_writes_json() {
        let (dir, _bench, board) = setup();
        let path = dir.path().join("out/status.json");
        assert!(board.dispatch("status", path.to_str().unwrap()).await);

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(json["modules"]["bench"].is_object());
        assert_eq!(json["git_version"], "GIT_NOT_FOUND");
    }

    #[tokio::test]
    async fn status_without_path_is_published_as_media() {
        let (_dir, bench, board) = setup();
        assert!(board.dispatch("status", "").await);
        let media = bench.media.lock().unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].0, "main");
        assert!(media[0].1.starts_with("status_") && media[0].1.ends_with(".json"));
    }

    #[tokio::test]
    async fn database_to_path_copies_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let board = board_with_archive(dir.path(), Arc::new(Bench::default()));
        let dest = dir.path().join("exports/nested/db.sqlite");

        assert!(board.dispatch("database", dest.to_str().unwrap()).await);
        assert_eq!(std::fs::read(&dest).unwrap(), b"SQLite format 3\0rows");
    }

    #[tokio::test]
    async fn database_without_path_is_published_as_media() {
        let dir = tempfile::tempdir().unwrap();
        let bench = Arc::new(Bench::default());
        let board = board_with_archive(dir.path(), Arc::clone(&bench));

        assert!(board.dispatch("database", "").await);
        let media = bench.media.lock().unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].0, "main");
        assert!(media[0].1.starts_with("db_") && media[0].1.ends_with(".sqlite"));
        assert_eq!(media[0].2, b"SQLite format 3\0rows");
    }

    #[tokio::test]
    async fn database_without_store_is_reported() {
        let (_dir, _bench, board) = setup();
        assert!(matches!(
            board.execute(Command::Database(None)).await,
            Err(CommandError::MissingCollaborator("database"))
        ));
    }

    #[tokio::test]
    async fn test_runs_self_tests() {
        let (_dir, bench, board) = setup();
        assert!(board.dispatch("test", "").await);
        assert_eq!(bench.tested.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_purges_and_requests_restart() {
        let (dir, bench, board) = setup();
        let download = dir.path().join("download");
        std::fs::create_dir_all(download.join("keep")).unwrap();
        std::fs::write(download.join("a.jpg"), b"x").unwrap();

        assert!(board.dispatch("reset", "").await);
        assert_eq!(bench.reset.load(Ordering::SeqCst), 1);
        assert!(!download.join("a.jpg").exists());
        assert!(download.join("keep").is_dir());
        assert!(board.restart_requested());
        assert!(!board.is_running());
    }

    #[test]
    fn purge_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(purge_directory(&dir.path().join("nope")).unwrap(), 0);
    }

    // ── shell ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn shell_captures_output_as_media() {
        let (dir, bench, board) = setup();
        assert!(board.dispatch("shell", "echo out\necho err >&2\n").await);

        let media = bench.media.lock().unwrap();
        let names: Vec<_> = media.iter().map(|(_, n, _)| n.as_str()).collect();
        assert_eq!(names.len(), 3);
        assert!(names[0].starts_with("shell_") && names[0].ends_with(".sh"));
        assert_eq!(names[1], format!("{}.stdout", names[0]));
        assert_eq!(media[1].2, b"out\n");
        assert_eq!(media[2].2, b"err\n");
        assert!(media.iter().all(|(origin, _, _)| origin == "main"));
        assert!(dir.path().join("data/shell").join(names[0]).exists());
    }
}
