//! The board: module scheduler, telemetry bus and command router host.
//!
//! [`Board`] owns every module for the lifetime of the process and drives
//! them through a fixed state machine:
//!
//! ```text
//! build() ──► Initializing ──(setup pass)──► Running ──(shutdown / quit / error)──► Destroying ──► Stopped
//! ```
//!
//! # Execution modes
//!
//! | Mode | Dispatch | Slow module |
//! |---|---|---|
//! | sequential (default) | each due update is awaited in turn | stalls the whole tick up to `update_timeout` |
//! | concurrent (`multi_threading`) | each due update is spawned and not awaited | only skips its own cycles |
//!
//! In both modes an update runs on its own task under the watchdog (see
//! [`watchdog`]) and a module is never dispatched while its previous update
//! is still registered as running.
//!
//! # Example
//! ```rust,ignore
//! let board = Board::builder(settings)
//!     .register(Arc::new(framer), 1.0)
//!     .register(Arc::new(light), 30.0)
//!     .build()?;
//! board.run().await?;
//! ```

mod bus;
pub mod error;
pub mod registry;
pub mod slot;
pub mod watchdog;

pub use error::BoardError;
pub use registry::{RunningGuard, RunningRegistry};
pub use slot::{ModuleSlot, SlotState};
pub use watchdog::UpdateOutcome;

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::process::Command as ProcessCommand;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::config::BoardSettings;
use crate::module::{Context, Module};
use crate::telemetry::{Origin, OriginId};

/// Name of the board's own origin.
pub const BOARD_ORIGIN_NAME: &str = "main";

// ── Lifecycle types ───────────────────────────────────────────────────────────

/// Lifecycle phase of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Running,
    Destroying,
    Stopped,
}

/// How a completed [`Board::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Shutdown by signal, `quit` command or external request.
    Finished,
    /// The `reset` command asked for a process restart.
    RestartRequested,
}

/// Revision of the deployed software, reported in status snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub version: String,
    pub branch: String,
}

impl GitIdentity {
    const NOT_FOUND: &'static str = "GIT_NOT_FOUND";

    /// Ask `git` in the current directory.
    pub fn detect() -> Self {
        Self {
            version: git_output(&["describe"]),
            branch: git_output(&["branch", "--show-current"]),
        }
    }

    pub fn unknown() -> Self {
        Self {
            version: Self::NOT_FOUND.to_owned(),
            branch: Self::NOT_FOUND.to_owned(),
        }
    }
}

fn git_output(args: &[&str]) -> String {
    match ProcessCommand::new("git").args(args).output() {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_owned(),
        _ => GitIdentity::NOT_FOUND.to_owned(),
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Collects modules and settings; [`build`](Self::build) validates them.
pub struct BoardBuilder {
    settings: BoardSettings,
    modules: Vec<(Arc<dyn Module>, f64)>,
    git: Option<GitIdentity>,
}

impl BoardBuilder {
    /// Register `module` to be updated every `update_frequency` seconds.
    ///
    /// Registration order is the order of the update loop and of bus
    /// delivery.
    pub fn register(mut self, module: Arc<dyn Module>, update_frequency: f64) -> Self {
        self.modules.push((module, update_frequency));
        self
    }

    /// Use a fixed git identity instead of running `git`.
    pub fn git_identity(mut self, git: GitIdentity) -> Self {
        self.git = Some(git);
        self
    }

    /// Validate the module set and create the board in [`Phase::Initializing`].
    ///
    /// # Errors
    /// * [`BoardError::DuplicateModule`] if two modules share a name.
    /// * [`BoardError::InvalidFrequency`] for negative or non-finite cadences.
    /// * [`BoardError::DataLocation`] if the data directory cannot be created.
    /// * [`BoardError::Clock`] if the wall clock is unusable.
    pub fn build(self) -> Result<Board, BoardError> {
        let settings = self.settings;

        if settings.cycle_delay.as_secs_f64() >= 1.0 {
            warn!("Cycle delay is >= 1 second ({:?})", settings.cycle_delay);
        }
        if settings.update_timeout.as_secs_f64() < 1.0 {
            warn!("Update timeout is < 1 second ({:?})", settings.update_timeout);
        }

        std::fs::create_dir_all(&settings.data_location).map_err(|source| {
            BoardError::DataLocation {
                path: settings.data_location.clone(),
                source,
            }
        })?;

        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(self.modules.len());
        for (index, (module, frequency)) in self.modules.into_iter().enumerate() {
            let name = module.name().to_owned();
            if !seen.insert(name.clone()) {
                return Err(BoardError::DuplicateModule(name));
            }
            if !frequency.is_finite() || frequency < 0.0 {
                return Err(BoardError::InvalidFrequency {
                    module: name,
                    frequency,
                });
            }
            let origin = Origin::new(OriginId::module(index), name.as_str());
            slots.push(ModuleSlot::new(module, origin, frequency));
        }

        if slots.is_empty() {
            warn!("No modules loaded!");
        }
        debug!("{} modules loaded.", slots.len());
        debug!(multithreading = settings.multi_threading, "Execution mode");

        let git = self.git.unwrap_or_else(GitIdentity::detect);
        info!("Running on git version: {}", git.version);
        info!("Running on git branch: {}", git.branch);

        Ok(Board {
            inner: Arc::new(Inner {
                settings,
                slots,
                board_origin: Origin::new(OriginId::BOARD, BOARD_ORIGIN_NAME),
                shutdown: CancellationToken::new(),
                restart_requested: AtomicBool::new(false),
                started: AtomicBool::new(false),
                phase: Mutex::new(Phase::Initializing),
                quit_time: Mutex::new(None),
                registry: RunningRegistry::new(),
                updates_per_second: AtomicU64::new(0),
                start_time: clock::now()?,
                git,
            }),
        })
    }
}

// ── Board ─────────────────────────────────────────────────────────────────────

struct Inner {
    settings: BoardSettings,
    slots: Vec<ModuleSlot>,
    board_origin: Origin,
    /// Cancelled once the board stops running; observed by the loop and by
    /// module background workers.
    shutdown: CancellationToken,
    restart_requested: AtomicBool,
    started: AtomicBool,
    phase: Mutex<Phase>,
    quit_time: Mutex<Option<f64>>,
    registry: RunningRegistry,
    updates_per_second: AtomicU64,
    start_time: f64,
    git: GitIdentity,
}

/// Shared handle to the board.  Cloning is cheap.
#[derive(Clone)]
pub struct Board {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Board {
    pub fn builder(settings: BoardSettings) -> BoardBuilder {
        BoardBuilder {
            settings,
            modules: Vec::new(),
            git: None,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn settings(&self) -> &BoardSettings {
        &self.inner.settings
    }

    /// Registered modules in registration order.
    pub fn slots(&self) -> &[ModuleSlot] {
        &self.inner.slots
    }

    pub(crate) fn slot(&self, index: usize) -> &ModuleSlot {
        &self.inner.slots[index]
    }

    pub fn find(&self, name: &str) -> Option<&ModuleSlot> {
        self.inner.slots.iter().find(|s| s.name() == name)
    }

    /// Origin used for events the board produces itself.
    pub fn origin(&self) -> &Origin {
        &self.inner.board_origin
    }

    pub fn registry(&self) -> &RunningRegistry {
        &self.inner.registry
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.inner.phase)
    }

    fn set_phase(&self, phase: Phase) {
        *lock(&self.inner.phase) = phase;
        debug!(phase = ?phase, "Board phase");
    }

    /// `true` until shutdown has been requested.
    pub fn is_running(&self) -> bool {
        !self.inner.shutdown.is_cancelled()
    }

    /// Token cancelled when the board stops running.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Request a cooperative shutdown; the loop exits at its next tick.
    pub fn shutdown(&self) {
        if self.is_running() {
            info!("Shutdown requested");
        }
        self.inner.shutdown.cancel();
    }

    /// Stop the board and report [`RunOutcome::RestartRequested`] from `run`.
    pub fn request_restart(&self) {
        self.inner.restart_requested.store(true, Ordering::SeqCst);
        self.shutdown();
    }

    pub fn restart_requested(&self) -> bool {
        self.inner.restart_requested.load(Ordering::SeqCst)
    }

    pub fn quit_time(&self) -> Option<f64> {
        *lock(&self.inner.quit_time)
    }

    /// Set or clear the scheduled shutdown time.
    pub fn set_quit_time(&self, quit_time: Option<f64>) {
        *lock(&self.inner.quit_time) = quit_time;
    }

    /// Loop iterations completed during the previous wall-clock second.
    pub fn updates_per_second(&self) -> u64 {
        self.inner.updates_per_second.load(Ordering::Relaxed)
    }

    pub fn start_time(&self) -> f64 {
        self.inner.start_time
    }

    pub fn git(&self) -> &GitIdentity {
        &self.inner.git
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Run the full lifecycle: setup pass, update loop, destroy pass.
    ///
    /// The destroy pass always runs.  A panic in the loop is resumed after
    /// it, and a loop error is returned after it.
    pub async fn run(&self) -> Result<RunOutcome, BoardError> {
        let board = self.clone();
        self.drive(async move { board.update_loop().await }).await
    }

    /// Setup pass, `update_loop` on its own task, destroy pass.
    async fn drive<F>(&self, update_loop: F) -> Result<RunOutcome, BoardError>
    where
        F: Future<Output = Result<(), BoardError>> + Send + 'static,
    {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(BoardError::AlreadyStarted);
        }

        self.initialize().await;
        self.set_phase(Phase::Running);

        let result = tokio::spawn(update_loop).await;

        self.destroy().await;
        self.set_phase(Phase::Stopped);

        match result {
            Ok(Ok(())) if self.restart_requested() => Ok(RunOutcome::RestartRequested),
            Ok(Ok(())) => Ok(RunOutcome::Finished),
            Ok(Err(e)) => {
                error!("Update loop failed: {}", e);
                Err(e)
            }
            Err(join_err) if join_err.is_panic() => {
                error!("Update loop panicked; modules destroyed, re-raising");
                std::panic::resume_unwind(join_err.into_panic())
            }
            Err(_) => Err(BoardError::LoopAborted),
        }
    }

    /// Call `setup` on every module.  A module whose setup fails is disabled;
    /// the others proceed.
    pub(crate) async fn initialize(&self) {
        debug!("Initializing modules");
        let mut ready = 0usize;
        for slot in self.slots() {
            let module = Arc::clone(&slot.module);
            let ctx = Context::new(self.clone(), slot.origin.clone());
            match watchdog::isolate(async move { module.setup(&ctx).await }).await {
                Ok(()) => ready += 1,
                Err(e) => {
                    error!(module = %slot.name(), "Error while initializing: {:#}", e);
                    slot.set_enabled(false);
                }
            }
        }
        info!("Initialize complete. ({}/{})", ready, self.slots().len());
    }

    /// Stop running and call `destroy` on every module, isolating failures.
    pub(crate) async fn destroy(&self) {
        debug!("Destroying modules");
        self.set_phase(Phase::Destroying);
        self.inner.shutdown.cancel();
        for slot in self.slots() {
            let module = Arc::clone(&slot.module);
            if let Err(e) = watchdog::isolate(async move { module.destroy().await }).await {
                error!(module = %slot.name(), "Error while destroying: {:#}", e);
            }
        }
    }

    async fn update_loop(&self) -> Result<(), BoardError> {
        debug!("Starting update loop");
        let cycle_delay = self.settings().cycle_delay;
        let mut full_second: i64 = 0;
        let mut updates: u64 = 0;

        while self.is_running() {
            let t = clock::now()?;

            if let Some(quit_time) = self.quit_time() {
                if t > quit_time {
                    info!(quit_time = quit_time, "Scheduled quit time reached");
                    self.shutdown();
                    break;
                }
            }

            // Truncation to whole seconds is the point here.
            let this_second = t.floor() as i64;
            if this_second != full_second {
                full_second = this_second;
                self.inner
                    .updates_per_second
                    .store(updates, Ordering::Relaxed);
                updates = 0;
            }
            updates += 1;

            self.tick(t).await;

            if !cycle_delay.is_zero() {
                tokio::time::sleep(cycle_delay).await;
            }
        }
        Ok(())
    }

    /// One dispatch pass over all modules at time `t`.
    ///
    /// Sequential mode returns after every due update has finished or timed
    /// out; concurrent mode returns right after spawning them.
    pub async fn tick(&self, t: f64) {
        for (index, slot) in self.slots().iter().enumerate() {
            if !slot.is_due(t) {
                continue;
            }
            // A skipped cycle leaves the slot unstamped so the module fires
            // on the first tick after its previous update ends.
            let Some(guard) = self.inner.registry.try_register(slot.name(), t) else {
                warn!(
                    module = %slot.name(),
                    "Thread {} already running! Skipping cycle", slot.name()
                );
                continue;
            };
            if !slot.try_claim(t) {
                continue;
            }

            if self.settings().multi_threading {
                debug!(module = %slot.name(), "Starting thread for module");
                tokio::spawn(watchdog::supervise(self.clone(), index, t, guard));
            } else {
                watchdog::supervise(self.clone(), index, t, guard).await;
            }
        }
    }

    // ── Status ────────────────────────────────────────────────────────────────

    /// Read-only diagnostic snapshot of the board and every module.
    pub fn status_snapshot(&self) -> JsonValue {
        let modules: Map<String, JsonValue> = self
            .slots()
            .iter()
            .map(|s| (s.name().to_owned(), JsonValue::Object(s.status())))
            .collect();

        json!({
            "modules": modules,
            "time": clock::now_or_zero(),
            "start_time": self.start_time(),
            "running": self.is_running(),
            "phase": self.phase(),
            "multithreading": self.settings().multi_threading,
            "cycle_delay": self.settings().cycle_delay.as_secs_f64(),
            "update_timeout": self.settings().update_timeout.as_secs_f64(),
            "data_location": absolute_display(&self.settings().data_location),
            "git_version": self.inner.git.version,
            "git_branch": self.inner.git.branch,
            "quit_time": self.quit_time(),
            "updates_per_second": self.updates_per_second(),
            "running_updates": self.inner.registry.names(),
        })
    }
}

fn absolute_display(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    #[derive(Default)]
    struct Counter {
        setups: AtomicUsize,
        destroys: AtomicUsize,
    }

    #[async_trait]
    impl Module for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        async fn setup(&self, _ctx: &Context) -> anyhow::Result<()> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn update(&self, _t: f64, _ctx: &Context) -> anyhow::Result<()> {
            Ok(())
        }
        async fn destroy(&self) -> anyhow::Result<()> {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn board(dir: &Path, counter: Arc<Counter>) -> Board {
        let settings = BoardSettings {
            data_location: dir.join("data"),
            ..BoardSettings::default()
        };
        Board::builder(settings)
            .register(counter, 1.0)
            .git_identity(GitIdentity::unknown())
            .build()
            .unwrap()
    }

    async fn exploding_loop() -> Result<(), BoardError> {
        panic!("loop exploded")
    }

    #[tokio::test]
    async fn loop_panic_destroys_modules_then_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(Counter::default());
        let board = board(dir.path(), Arc::clone(&counter));

        let runner = board.clone();
        let joined = tokio::spawn(async move {
            runner.drive(exploding_loop()).await
        })
        .await;

        let err = joined.unwrap_err();
        assert!(err.is_panic());
        let payload = err.into_panic();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"loop exploded"));
        assert_eq!(counter.setups.load(Ordering::SeqCst), 1);
        assert_eq!(counter.destroys.load(Ordering::SeqCst), 1);
        assert_eq!(board.phase(), Phase::Stopped);
        assert!(!board.is_running());
    }

    #[tokio::test]
    async fn loop_error_is_returned_after_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(Counter::default());
        let board = board(dir.path(), Arc::clone(&counter));

        let result = board.drive(async { Err(BoardError::LoopAborted) }).await;

        assert!(matches!(result, Err(BoardError::LoopAborted)));
        assert_eq!(counter.destroys.load(Ordering::SeqCst), 1);
        assert_eq!(board.phase(), Phase::Stopped);
    }
}
