//! Render Test Utilities
//!
//! Recording mocks for the render seams, so orchestration can be tested
//! without a browser. Every surface call is logged with the runtime instant
//! it happened at, which makes paused-clock tests able to assert on timing.
//!
//! # Usage
//!
//! ```ignore
//! use billboard_core::render::test_utils::{MockEnumerator, MockRenderBackend};
//!
//! let backend = MockRenderBackend::new();
//! backend.fail_navigation("https://example.com/broken");
//! let enumerator = MockEnumerator::with_count(2);
//!
//! // ... run the orchestrator ...
//!
//! let session = &backend.sessions()[0];
//! assert_eq!(session.surface(0).unwrap().navigations().len(), 4);
//! enumerator.set_count(1); // unplug a display
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{
    DisplayEnumerator, LaunchOptions, Liveness, RenderBackend, RenderError, RenderSession,
    RenderSurface, WaitPolicy,
};
use crate::display::DisplayGeometry;

type FailingUrls = Arc<Mutex<HashSet<String>>>;

// ============================================================================
// Call Tracking
// ============================================================================

/// One recorded surface call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SurfaceCall {
    /// `navigate(url)`
    Navigate {
        /// Requested URL
        url: String,
        /// Wait policy used
        wait: WaitPolicy,
        /// When the call was made
        at: Instant,
    },
    /// `apply_style(css)`
    ApplyStyle {
        /// Injected CSS
        css: String,
        /// When the call was made
        at: Instant,
    },
    /// `bring_to_front()`
    BringToFront {
        /// When the call was made
        at: Instant,
    },
}

impl SurfaceCall {
    /// When the call was made
    #[must_use]
    pub fn at(&self) -> Instant {
        match self {
            Self::Navigate { at, .. } | Self::ApplyStyle { at, .. } | Self::BringToFront { at } => {
                *at
            }
        }
    }
}

// ============================================================================
// Mock Backend
// ============================================================================

/// Backend that hands out [`MockSession`]s and keeps them for inspection
#[derive(Clone, Default)]
pub struct MockRenderBackend {
    sessions: Arc<Mutex<Vec<Arc<MockSession>>>>,
    failing_urls: FailingUrls,
    failing_launches: Arc<Mutex<HashSet<usize>>>,
}

impl MockRenderBackend {
    /// Create a backend where everything succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every navigation to `url` fail (the call is still recorded)
    pub fn fail_navigation(&self, url: impl Into<String>) {
        self.failing_urls.lock().insert(url.into());
    }

    /// Make launching a session for display `index` fail
    pub fn fail_launch(&self, index: usize) {
        self.failing_launches.lock().insert(index);
    }

    /// Every session launched so far, in launch order
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    /// Sessions launched for display `index`
    #[must_use]
    pub fn sessions_for(&self, index: usize) -> Vec<Arc<MockSession>> {
        self.sessions
            .lock()
            .iter()
            .filter(|s| s.options.display == index)
            .cloned()
            .collect()
    }

    /// Number of sessions launched so far
    #[must_use]
    pub fn launch_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Sessions still connected
    #[must_use]
    pub fn connected(&self) -> Vec<Arc<MockSession>> {
        self.sessions
            .lock()
            .iter()
            .filter(|s| s.is_connected())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RenderBackend for MockRenderBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn launch(&self, options: LaunchOptions) -> Result<Arc<dyn RenderSession>, RenderError> {
        if self.failing_launches.lock().contains(&options.display) {
            return Err(RenderError::Launch(format!(
                "simulated launch failure for display {}",
                options.display
            )));
        }

        let session = Arc::new_cyclic(|this| MockSession {
            this: this.clone(),
            options,
            surfaces: Mutex::new(Vec::new()),
            front: Mutex::new(None),
            close_calls: AtomicUsize::new(0),
            liveness: Liveness::new(),
            failing_urls: Arc::clone(&self.failing_urls),
        });
        session.open_surface();
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

// ============================================================================
// Mock Session
// ============================================================================

/// Recording session
pub struct MockSession {
    this: Weak<MockSession>,
    options: LaunchOptions,
    surfaces: Mutex<Vec<Arc<MockSurface>>>,
    front: Mutex<Option<usize>>,
    close_calls: AtomicUsize,
    liveness: Liveness,
    failing_urls: FailingUrls,
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("display", &self.options.display)
            .field("surfaces", &self.surfaces.lock().len())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl MockSession {
    fn open_surface(&self) -> Arc<MockSurface> {
        let mut surfaces = self.surfaces.lock();
        let surface = Arc::new(MockSurface {
            index: surfaces.len(),
            session: self.this.clone(),
            calls: Mutex::new(Vec::new()),
            liveness: Liveness::new(),
            failing_urls: Arc::clone(&self.failing_urls),
        });
        surfaces.push(Arc::clone(&surface));
        surface
    }

    /// Options the session was launched with
    #[must_use]
    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    /// Display index the session was launched for
    #[must_use]
    pub fn display(&self) -> usize {
        self.options.display
    }

    /// Surface by creation order
    #[must_use]
    pub fn surface(&self, index: usize) -> Option<Arc<MockSurface>> {
        self.surfaces.lock().get(index).cloned()
    }

    /// Number of surfaces created, including the initial one
    #[must_use]
    pub fn surface_count(&self) -> usize {
        self.surfaces.lock().len()
    }

    /// Index of the surface brought to front last
    #[must_use]
    pub fn front(&self) -> Option<usize> {
        *self.front.lock()
    }

    /// Every navigation on every surface, in time order
    #[must_use]
    pub fn navigations(&self) -> Vec<(usize, String, Instant)> {
        let mut navigations: Vec<_> = self
            .surfaces
            .lock()
            .iter()
            .flat_map(|surface| {
                surface
                    .calls()
                    .into_iter()
                    .filter_map(move |call| match call {
                        SurfaceCall::Navigate { url, at, .. } => Some((surface.index, url, at)),
                        _ => None,
                    })
            })
            .collect();
        navigations.sort_by_key(|(_, _, at)| *at);
        navigations
    }

    /// How many times `close()` was called
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Simulate the render process dying
    pub fn disconnect(&self) {
        if self.liveness.end() {
            for surface in self.surfaces.lock().iter() {
                surface.liveness.end();
            }
        }
    }
}

#[async_trait]
impl RenderSession for MockSession {
    async fn surfaces(&self) -> Result<Vec<Arc<dyn RenderSurface>>, RenderError> {
        if !self.is_connected() {
            return Err(RenderError::Disconnected);
        }
        Ok(self
            .surfaces
            .lock()
            .iter()
            .filter(|s| s.is_open())
            .map(|s| Arc::clone(s) as Arc<dyn RenderSurface>)
            .collect())
    }

    async fn create_surface(&self) -> Result<Arc<dyn RenderSurface>, RenderError> {
        if !self.is_connected() {
            return Err(RenderError::Disconnected);
        }
        Ok(self.open_surface())
    }

    fn is_connected(&self) -> bool {
        self.liveness.is_alive()
    }

    async fn close(&self) -> Result<(), RenderError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.disconnect();
        Ok(())
    }

    async fn disconnected(&self) {
        self.liveness.ended().await;
    }
}

// ============================================================================
// Mock Surface
// ============================================================================

/// Recording surface
pub struct MockSurface {
    index: usize,
    session: Weak<MockSession>,
    calls: Mutex<Vec<SurfaceCall>>,
    liveness: Liveness,
    failing_urls: FailingUrls,
}

impl std::fmt::Debug for MockSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSurface")
            .field("index", &self.index)
            .field("calls", &self.calls.lock().len())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl MockSurface {
    /// Creation index within the session
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Every call, in order
    #[must_use]
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().clone()
    }

    /// URLs navigated to, in order
    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Navigate { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    /// Styles applied, in order
    #[must_use]
    pub fn styles(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::ApplyStyle { css, .. } => Some(css.clone()),
                _ => None,
            })
            .collect()
    }

    /// Simulate the surface being closed from outside
    pub fn close(&self) {
        self.liveness.end();
    }

    fn record(&self, call: SurfaceCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl RenderSurface for MockSurface {
    async fn navigate(&self, url: &str, wait: WaitPolicy) -> Result<(), RenderError> {
        if !self.is_open() {
            return Err(RenderError::SurfaceClosed);
        }
        self.record(SurfaceCall::Navigate {
            url: url.to_string(),
            wait,
            at: Instant::now(),
        });
        if self.failing_urls.lock().contains(url) {
            return Err(RenderError::Navigation {
                url: url.to_string(),
                reason: "simulated navigation failure".to_string(),
            });
        }
        Ok(())
    }

    async fn apply_style(&self, css: &str) -> Result<(), RenderError> {
        if !self.is_open() {
            return Err(RenderError::SurfaceClosed);
        }
        self.record(SurfaceCall::ApplyStyle {
            css: css.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn bring_to_front(&self) -> Result<(), RenderError> {
        if !self.is_open() {
            return Err(RenderError::SurfaceClosed);
        }
        self.record(SurfaceCall::BringToFront { at: Instant::now() });
        if let Some(session) = self.session.upgrade() {
            *session.front.lock() = Some(self.index);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.liveness.is_alive()
    }

    async fn closed(&self) {
        self.liveness.ended().await;
    }
}

// ============================================================================
// Mock Enumerator
// ============================================================================

/// Enumerator whose display list can be changed while running
#[derive(Clone, Default)]
pub struct MockEnumerator {
    displays: Arc<Mutex<Vec<DisplayGeometry>>>,
    polls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MockEnumerator {
    /// Enumerate exactly `displays`
    #[must_use]
    pub fn new(displays: Vec<DisplayGeometry>) -> Self {
        Self {
            displays: Arc::new(Mutex::new(displays)),
            ..Self::default()
        }
    }

    /// `count` full-HD displays side by side
    #[must_use]
    pub fn with_count(count: usize) -> Self {
        Self::new(side_by_side(count))
    }

    /// Replace the display list
    pub fn set_displays(&self, displays: Vec<DisplayGeometry>) {
        *self.displays.lock() = displays;
    }

    /// Replace the display list with `count` side-by-side displays
    pub fn set_count(&self, count: usize) {
        self.set_displays(side_by_side(count));
    }

    /// Make `list()` fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// How many times `list()` was called
    #[must_use]
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

fn side_by_side(count: usize) -> Vec<DisplayGeometry> {
    (0..count)
        .map(|i| {
            let left = i32::try_from(i).unwrap_or(i32::MAX).saturating_mul(1920);
            DisplayGeometry::new(left, 0, 1920, 1080)
        })
        .collect()
}

#[async_trait]
impl DisplayEnumerator for MockEnumerator {
    async fn list(&self) -> Result<Vec<DisplayGeometry>, RenderError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RenderError::Enumeration("simulated enumeration failure".to_string()));
        }
        Ok(self.displays.lock().clone())
    }
}
