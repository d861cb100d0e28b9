//! Orchestrator - Display Lifecycle
//!
//! Owns everything one billboard run needs and tears it down again:
//!
//! 1. Resolve configuration into [`Settings`]
//! 2. Enumerate displays, sorted top-to-bottom then left-to-right
//! 3. Launch one render session per non-ignored display, concurrently
//! 4. Give every display a surface pool and put the launch page on air
//! 5. Run one [`RotationLoop`] per display, plus the [`TopologyWatch`],
//!    all on one shared [`Scheduler`]
//! 6. When every session has gone away, close the scheduler; all loops
//!    return and `start` either restarts from step 2 or returns
//!
//! # Restarting
//!
//! `restart()` sets the restart flag and closes every session. The watch
//! reacts to a flag set with `request_restart()` on its next poll, and to a
//! changed display count by doing the same thing itself.
//!
//! # Failure isolation
//!
//! A display whose session fails to launch is skipped. Render calls inside a
//! loop are best-effort: failures are logged and the loop carries on.

use std::sync::Arc;

use futures::future::{join_all, select_all};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::config::{BillboardToml, ConfigError, DisplayConfig, Settings};
use crate::display::{sort_displays, Display, DisplayGeometry, DisplaySnapshot};
use crate::events::{EventBus, OrchestratorEvent, RestartReason};
use crate::render::{
    DisplayEnumerator, LaunchOptions, RenderBackend, RenderError, RenderSession, RenderSurface,
    WaitPolicy,
};
use crate::rotation::{best_effort, RotationExit, RotationLoop};
use crate::scheduler::{Scheduler, WallClock};
use crate::topology::{RestartFlag, TopologyWatch, WatchOutcome};

/// Errors returned by [`Orchestrator::start`]
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Configuration could not be resolved; nothing was launched
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    /// `start` was called while a run is active
    #[error("Orchestrator is already running")]
    AlreadyRunning,

    /// Displays could not be listed at the start of a run
    #[error("Display enumeration failed: {0}")]
    Enumeration(#[source] RenderError),
}

/// Lifecycle phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Not started, or `start` has returned
    Idle,
    /// Inside `start`
    Running,
}

struct State {
    phase: Phase,
    settings: Option<Arc<Settings>>,
    /// Displays of the run in progress
    active: Option<Vec<Arc<Display>>>,
    /// `exit` was called during this `start`
    stopping: bool,
}

struct Inner {
    /// Display source
    enumerator: Arc<dyn DisplayEnumerator>,
    /// Session launcher
    backend: Arc<dyn RenderBackend>,
    /// Fixed clock for every run's scheduler, or the system clock per run
    clock: Option<WallClock>,
    /// Event fan-out
    events: EventBus,
    /// Set to turn the end of the current run into a restart
    restart: RestartFlag,
    /// Runs started so far
    runs: Mutex<u64>,
    /// Lifecycle state
    state: Mutex<State>,
}

/// Runs the billboard on every attached display
///
/// Cheap to clone; clones control the same orchestrator, so one clone can
/// sit in `start` while another calls `exit` or `restart`.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

/// How a single run ended
enum RunOutcome {
    Stopped,
    Restart(RestartReason),
}

/// Result of one task in a run's join set
enum LoopExit {
    Rotation { display: usize, exit: RotationExit },
    Topology(WatchOutcome),
}

/// Returns the orchestrator to idle however `start` ends
struct RunningGuard<'a>(&'a Inner);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.phase = Phase::Idle;
        state.active = None;
        state.stopping = false;
    }
}

impl Orchestrator {
    /// Create an orchestrator whose schedulers follow the system clock
    #[must_use]
    pub fn new(enumerator: Arc<dyn DisplayEnumerator>, backend: Arc<dyn RenderBackend>) -> Self {
        Self::build(enumerator, backend, None)
    }

    /// Create an orchestrator whose schedulers all use `clock`
    #[must_use]
    pub fn with_clock(
        enumerator: Arc<dyn DisplayEnumerator>,
        backend: Arc<dyn RenderBackend>,
        clock: WallClock,
    ) -> Self {
        Self::build(enumerator, backend, Some(clock))
    }

    fn build(
        enumerator: Arc<dyn DisplayEnumerator>,
        backend: Arc<dyn RenderBackend>,
        clock: Option<WallClock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                enumerator,
                backend,
                clock,
                events: EventBus::new(),
                restart: RestartFlag::default(),
                runs: Mutex::new(0),
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    settings: None,
                    active: None,
                    stopping: false,
                }),
            }),
        }
    }

    /// Receive orchestrator events from now on
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    /// Current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    /// Whether `start` is in progress
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Settings of the current (or last) start
    #[must_use]
    pub fn settings(&self) -> Option<Arc<Settings>> {
        self.inner.state.lock().settings.clone()
    }

    /// Snapshots of the displays driven by the run in progress
    #[must_use]
    pub fn displays(&self) -> Vec<DisplaySnapshot> {
        self.inner
            .state
            .lock()
            .active
            .as_ref()
            .map(|displays| displays.iter().map(|d| d.snapshot()).collect())
            .unwrap_or_default()
    }

    /// Drive every display until `exit` is called or every session goes away
    ///
    /// Restarts (requested or caused by a topology change) happen inside this
    /// call; it returns only once a run ends without one.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::AlreadyRunning`] if another `start` is active
    /// - [`OrchestratorError::Configuration`] if `config` does not resolve;
    ///   nothing is launched
    /// - [`OrchestratorError::Enumeration`] if displays cannot be listed
    pub async fn start(&self, config: &BillboardToml) -> Result<(), OrchestratorError> {
        {
            let mut state = self.inner.state.lock();
            if state.phase == Phase::Running {
                return Err(OrchestratorError::AlreadyRunning);
            }
            state.phase = Phase::Running;
            state.stopping = false;
        }
        let _guard = RunningGuard(&self.inner);

        let settings = Arc::new(Settings::resolve(config)?);
        self.inner.state.lock().settings = Some(Arc::clone(&settings));
        self.inner.restart.take();

        let result = self.run_until_stopped(&settings).await;
        self.inner.events.emit(OrchestratorEvent::Stopped);
        tracing::info!("Orchestrator stopped");
        result
    }

    /// Restart after the current run: set the flag and close every session
    ///
    /// Sessions still launching are closed as soon as their run comes up.
    pub async fn restart(&self) {
        tracing::info!("Restarting all displays");
        self.inner.restart.request();
        let displays = self.active_displays();
        if !displays.is_empty() {
            close_sessions(&displays).await;
        }
    }

    /// Restart on the watch's next poll
    ///
    /// Without a display watch nothing polls the flag, so this restarts
    /// right away.
    pub async fn request_restart(&self) {
        let watching = self.settings().is_some_and(|s| s.watch_displays);
        if watching {
            tracing::info!("Restart requested, waiting for the display watch");
            self.inner.restart.request();
        } else {
            self.restart().await;
        }
    }

    /// Close every render session of the current run
    ///
    /// `start` returns once the loops have wound down. A pending restart
    /// request is dropped, and a run that is still launching (or about to be
    /// relaunched) is closed as soon as its sessions are up.
    pub async fn exit(&self) {
        let displays = {
            let mut state = self.inner.state.lock();
            if state.phase == Phase::Idle {
                tracing::debug!("Nothing to close");
                return;
            }
            state.stopping = true;
            state.active.clone().unwrap_or_default()
        };
        self.inner.restart.take();
        if displays.is_empty() {
            tracing::info!("Exit requested while no run is up");
            return;
        }
        tracing::info!(displays = displays.len(), "Closing all render sessions");
        close_sessions(&displays).await;
    }

    fn is_stopping(&self) -> bool {
        self.inner.state.lock().stopping
    }

    fn active_displays(&self) -> Vec<Arc<Display>> {
        self.inner
            .state
            .lock()
            .active
            .clone()
            .unwrap_or_default()
    }

    async fn run_until_stopped(&self, settings: &Arc<Settings>) -> Result<(), OrchestratorError> {
        loop {
            if self.is_stopping() {
                return Ok(());
            }
            match self.run_once(settings).await? {
                RunOutcome::Stopped => return Ok(()),
                RunOutcome::Restart(reason) => {
                    tracing::info!(?reason, "Restarting");
                    self.inner.events.emit(OrchestratorEvent::Restarting { reason });
                    self.inner.restart.take();
                }
            }
        }
    }

    async fn run_once(&self, settings: &Arc<Settings>) -> Result<RunOutcome, OrchestratorError> {
        let mut geometries = self
            .inner
            .enumerator
            .list()
            .await
            .map_err(OrchestratorError::Enumeration)?;
        sort_displays(&mut geometries);
        let known = geometries.len();

        let run = {
            let mut runs = self.inner.runs.lock();
            *runs += 1;
            *runs
        };
        let scheduler = Scheduler::with_clock(self.inner.clock.unwrap_or_else(WallClock::system));
        tracing::info!(run, displays = known, "Starting run");

        let launches = geometries.iter().enumerate().filter_map(|(index, geometry)| {
            let config = settings.display_config(index)?;
            if config.ignore {
                tracing::info!(display = index, "Display ignored");
                return None;
            }
            Some(self.launch_display(index, *geometry, config.clone(), settings))
        });
        let displays: Vec<Arc<Display>> = join_all(launches).await.into_iter().flatten().collect();

        if displays.is_empty() {
            tracing::warn!(run, "No displays to drive");
            scheduler.close();
            return Ok(self.finish_run(RunOutcome::Stopped));
        }

        // Published under the lock that exit() takes, so either exit() sees
        // these displays or the check below sees its request
        let stopping = {
            let mut state = self.inner.state.lock();
            state.active = Some(displays.clone());
            state.stopping
        };
        if stopping || self.inner.restart.is_requested() {
            tracing::info!(run, stopping, "Closing sessions launched during exit or restart");
            scheduler.close();
            close_sessions(&displays).await;
            return Ok(self.finish_run(RunOutcome::Stopped));
        }

        let mut watchers = JoinSet::new();
        for display in &displays {
            watchers.spawn(watch_disconnect(
                Arc::clone(display),
                displays.clone(),
                scheduler.clone(),
            ));
        }

        let mut loops = JoinSet::new();
        for display in &displays {
            let index = display.index();
            let rotation = RotationLoop::new(
                Arc::clone(display),
                scheduler.clone(),
                settings,
                self.inner.events.clone(),
            );
            loops.spawn(async move {
                LoopExit::Rotation {
                    display: index,
                    exit: rotation.run().await,
                }
            });
        }
        if settings.watch_displays {
            let watch = TopologyWatch::new(
                scheduler.clone(),
                Arc::clone(&self.inner.enumerator),
                known,
                settings.watch_interval,
                self.inner.restart.clone(),
            );
            loops.spawn(async move { LoopExit::Topology(watch.run().await) });
        }

        self.inner.events.emit(OrchestratorEvent::SessionsLaunched {
            run,
            displays: displays.len(),
        });

        let mut outcome = RunOutcome::Stopped;
        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(LoopExit::Rotation { display: index, exit }) => {
                    tracing::debug!(display = index, ?exit, "Rotation loop finished");
                }
                Ok(LoopExit::Topology(WatchOutcome::Interrupted)) => {}
                Ok(LoopExit::Topology(WatchOutcome::RestartRequested)) => {
                    outcome = RunOutcome::Restart(RestartReason::Requested);
                    close_sessions(&displays).await;
                }
                Ok(LoopExit::Topology(WatchOutcome::TopologyChanged { before, after })) => {
                    outcome = RunOutcome::Restart(RestartReason::TopologyChanged { before, after });
                    close_sessions(&displays).await;
                }
                Err(error) => {
                    tracing::error!(%error, "Loop task failed");
                }
            }
        }

        scheduler.close();
        watchers.shutdown().await;
        Ok(self.finish_run(outcome))
    }

    fn finish_run(&self, outcome: RunOutcome) -> RunOutcome {
        let stopping = {
            let mut state = self.inner.state.lock();
            state.active = None;
            state.stopping
        };
        match outcome {
            _ if stopping => RunOutcome::Stopped,
            RunOutcome::Stopped if self.inner.restart.is_requested() => {
                RunOutcome::Restart(RestartReason::Requested)
            }
            outcome => outcome,
        }
    }

    async fn launch_display(
        &self,
        index: usize,
        geometry: DisplayGeometry,
        config: DisplayConfig,
        settings: &Settings,
    ) -> Option<Arc<Display>> {
        let options = LaunchOptions {
            display: index,
            geometry,
            options: config.browser_options.clone(),
        };
        let session = match self.inner.backend.launch(options).await {
            Ok(session) => session,
            Err(error) => {
                tracing::error!(
                    display = index,
                    backend = self.inner.backend.name(),
                    %error,
                    "Failed to launch render session, skipping display"
                );
                return None;
            }
        };

        match prepare_surfaces(index, &session, settings).await {
            Ok(surfaces) => {
                tracing::info!(display = index, %geometry, surfaces = surfaces.len(), "Display ready");
                Some(Arc::new(Display::new(index, geometry, config, session, surfaces)))
            }
            Err(error) => {
                tracing::error!(display = index, %error, "Failed to open surfaces, skipping display");
                best_effort(index, "close session", session.close().await);
                None
            }
        }
    }
}

/// Put the launch page on the first surface and open the preload surfaces
async fn prepare_surfaces(
    index: usize,
    session: &Arc<dyn RenderSession>,
    settings: &Settings,
) -> Result<Vec<Arc<dyn RenderSurface>>, RenderError> {
    let first = match session.surfaces().await?.into_iter().next() {
        Some(surface) => surface,
        None => session.create_surface().await?,
    };
    best_effort(
        index,
        "load launch page",
        first.navigate(&settings.launch_url, WaitPolicy::Load).await,
    );

    let mut surfaces = vec![first];
    for _ in 0..settings.prepare_pages {
        match session.create_surface().await {
            Ok(surface) => surfaces.push(surface),
            Err(error) => {
                tracing::warn!(display = index, %error, "Failed to open preload surface");
                break;
            }
        }
    }

    best_effort(index, "bring launch page to front", surfaces[0].bring_to_front().await);
    Ok(surfaces)
}

/// Mark `display` closed once its session or any of its surfaces goes away,
/// and close the scheduler when it was the last one
async fn watch_disconnect(display: Arc<Display>, all: Vec<Arc<Display>>, scheduler: Scheduler) {
    let session = Arc::clone(display.session());
    let surfaces: Vec<_> = display
        .surfaces()
        .iter()
        .map(|surface| {
            let surface = Arc::clone(surface);
            Box::pin(async move { surface.closed().await })
        })
        .collect();

    let index = display.index();

    // Closing a session ends its surfaces too; only an independent surface
    // close needs the session closed here
    tokio::select! {
        biased;
        () = session.disconnected() => {}
        _ = select_all(surfaces) => {
            if session.is_connected() {
                tracing::info!(display = index, "Surface closed, closing its session");
                best_effort(index, "close session", session.close().await);
            }
        }
    }

    if display.mark_closed() {
        tracing::info!(display = index, "Display closed");
    }
    if all.iter().all(|d| d.is_closed()) {
        tracing::info!("All displays closed");
        scheduler.close();
    }
}

async fn close_sessions(displays: &[Arc<Display>]) {
    join_all(displays.iter().map(|display| async move {
        best_effort(display.index(), "close session", display.session().close().await);
    }))
    .await;
}
