//! Headless Render Backend
//!
//! Drives displays without painting anything: each surface fetches its page
//! over HTTP with reqwest and records what would be on screen. Useful for
//! smoke-testing a configuration on a machine without a browser, and as the
//! daemon's default backend.
//!
//! `about:` and `data:` URLs are accepted without any fetch. Injected styles
//! are kept per document and dropped on the next navigation, like a browser
//! would.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    LaunchOptions, Liveness, RenderBackend, RenderError, RenderSession, RenderSurface, WaitPolicy,
    BLANK_URL,
};

/// Default per-request timeout
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend that loads pages over HTTP without rendering them
#[derive(Clone)]
pub struct HeadlessBackend {
    client: reqwest::Client,
    next_session: Arc<AtomicU64>,
}

impl HeadlessBackend {
    /// Create a backend with the default fetch timeout
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Create a backend with a custom fetch timeout
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build HTTP client, using defaults");
                reqwest::Client::new()
            });
        Self {
            client,
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RenderBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    async fn launch(&self, options: LaunchOptions) -> Result<Arc<dyn RenderSession>, RenderError> {
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            session = id,
            display = options.display,
            geometry = %options.geometry,
            "Launching headless session"
        );

        let session = HeadlessSession {
            id,
            client: self.client.clone(),
            surfaces: Mutex::new(Vec::new()),
            front: Arc::new(AtomicUsize::new(0)),
            liveness: Liveness::new(),
        };
        // A fresh browser window comes with one blank tab
        session.open_surface();
        Ok(Arc::new(session))
    }
}

/// One headless session
pub struct HeadlessSession {
    id: u64,
    client: reqwest::Client,
    surfaces: Mutex<Vec<Arc<HeadlessSurface>>>,
    front: Arc<AtomicUsize>,
    liveness: Liveness,
}

impl HeadlessSession {
    fn open_surface(&self) -> Arc<HeadlessSurface> {
        let mut surfaces = self.surfaces.lock();
        let surface = Arc::new(HeadlessSurface {
            id: surfaces.len(),
            session: self.id,
            client: self.client.clone(),
            url: Mutex::new(BLANK_URL.to_string()),
            styles: Mutex::new(Vec::new()),
            front: Arc::clone(&self.front),
            liveness: Liveness::new(),
        });
        surfaces.push(Arc::clone(&surface));
        surface
    }

    /// Index of the surface in front
    #[must_use]
    pub fn front(&self) -> usize {
        self.front.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderSession for HeadlessSession {
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
        if self.liveness.end() {
            for surface in self.surfaces.lock().iter() {
                surface.liveness.end();
            }
            tracing::info!(session = self.id, "Headless session closed");
        }
        Ok(())
    }

    async fn disconnected(&self) {
        self.liveness.ended().await;
    }
}

/// One headless surface
pub struct HeadlessSurface {
    id: usize,
    session: u64,
    client: reqwest::Client,
    url: Mutex<String>,
    styles: Mutex<Vec<String>>,
    front: Arc<AtomicUsize>,
    liveness: Liveness,
}

impl HeadlessSurface {
    /// URL of the current document
    #[must_use]
    pub fn url(&self) -> String {
        self.url.lock().clone()
    }

    /// Styles injected into the current document
    #[must_use]
    pub fn styles(&self) -> Vec<String> {
        self.styles.lock().clone()
    }

    async fn fetch(&self, url: &str, wait: WaitPolicy) -> Result<(), RenderError> {
        let failed = |reason: String| RenderError::Navigation {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| failed(e.to_string()))?;

        if wait == WaitPolicy::Load {
            let body = response.bytes().await.map_err(|e| failed(e.to_string()))?;
            tracing::debug!(
                session = self.session,
                surface = self.id,
                bytes = body.len(),
                "Fetched page body"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl RenderSurface for HeadlessSurface {
    async fn navigate(&self, url: &str, wait: WaitPolicy) -> Result<(), RenderError> {
        if !self.is_open() {
            return Err(RenderError::SurfaceClosed);
        }

        let local = url.starts_with("about:") || url.starts_with("data:");
        if !local && wait != WaitPolicy::Commit {
            self.fetch(url, wait).await?;
        }

        *self.url.lock() = url.to_string();
        self.styles.lock().clear();
        tracing::debug!(session = self.session, surface = self.id, url, "Navigated");
        Ok(())
    }

    async fn apply_style(&self, css: &str) -> Result<(), RenderError> {
        if !self.is_open() {
            return Err(RenderError::SurfaceClosed);
        }
        self.styles.lock().push(css.to_string());
        Ok(())
    }

    async fn bring_to_front(&self) -> Result<(), RenderError> {
        if !self.is_open() {
            return Err(RenderError::SurfaceClosed);
        }
        self.front.store(self.id, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.liveness.is_alive()
    }

    async fn closed(&self) {
        self.liveness.ended().await;
    }
}
