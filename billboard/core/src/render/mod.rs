//! Render Backend Abstraction
//!
//! The orchestrator drives pages through three pluggable seams:
//!
//! - [`DisplayEnumerator`]: reports the attached physical displays
//! - [`RenderBackend`]: launches one [`RenderSession`] per display
//! - [`RenderSurface`]: a page-holding surface inside a session (a browser tab)
//!
//! Implementations live alongside: [`headless::HeadlessBackend`] fetches pages
//! over HTTP without painting them, [`screens`] provides static and
//! file-backed enumerators, and [`test_utils`] holds recording mocks.

pub mod headless;
pub mod screens;
pub mod test_utils;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::BrowserOptions;
use crate::display::DisplayGeometry;

pub use headless::HeadlessBackend;
pub use screens::{ConfigFileEnumerator, StaticEnumerator};

/// URL used to blank a surface that has left the air
pub const BLANK_URL: &str = "about:blank";

/// Errors reported by render backends and enumerators
#[derive(Debug, Error)]
pub enum RenderError {
    /// Session could not be started
    #[error("Failed to launch render session: {0}")]
    Launch(String),

    /// Page failed to load
    #[error("Navigation to {url} failed: {reason}")]
    Navigation {
        /// Requested URL
        url: String,
        /// Backend-specific cause
        reason: String,
    },

    /// Style injection failed
    #[error("Failed to apply style: {0}")]
    Style(String),

    /// The session is gone
    #[error("Render session disconnected")]
    Disconnected,

    /// The surface is gone
    #[error("Render surface closed")]
    SurfaceClosed,

    /// Displays could not be listed
    #[error("Display enumeration failed: {0}")]
    Enumeration(String),

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// How long a navigation waits before it resolves
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Until the page and all subresources have loaded
    Load,
    /// Until the document has been parsed
    #[default]
    DomContentLoaded,
    /// Return as soon as the request is issued
    Commit,
}

/// Parameters for launching one session
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchOptions {
    /// Physical display index
    pub display: usize,
    /// Window geometry covering the display
    pub geometry: DisplayGeometry,
    /// Backend-specific options (merged from configuration)
    pub options: BrowserOptions,
}

/// Lists the physical displays currently attached
#[async_trait]
pub trait DisplayEnumerator: Send + Sync {
    /// Current display geometries, in any order
    async fn list(&self) -> Result<Vec<DisplayGeometry>, RenderError>;
}

/// Starts render sessions
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Launch a session covering one display
    async fn launch(&self, options: LaunchOptions) -> Result<Arc<dyn RenderSession>, RenderError>;
}

/// One render process bound to one display
#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Surfaces the session already has open
    async fn surfaces(&self) -> Result<Vec<Arc<dyn RenderSurface>>, RenderError>;

    /// Open a new surface
    async fn create_surface(&self) -> Result<Arc<dyn RenderSurface>, RenderError>;

    /// Whether the session is still alive
    fn is_connected(&self) -> bool;

    /// Shut the session down; its surfaces close with it
    async fn close(&self) -> Result<(), RenderError>;

    /// Resolves once the session has gone away, for whatever reason
    async fn disconnected(&self);
}

/// A page-holding surface
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Load `url`
    async fn navigate(&self, url: &str, wait: WaitPolicy) -> Result<(), RenderError>;

    /// Inject a style sheet into the current document
    async fn apply_style(&self, css: &str) -> Result<(), RenderError>;

    /// Make this the visible surface of its session
    async fn bring_to_front(&self) -> Result<(), RenderError>;

    /// Whether the surface is still open
    fn is_open(&self) -> bool;

    /// Resolves once the surface has closed
    async fn closed(&self);
}

/// Alive/ended flag with an awaitable transition, shared by backends and mocks
#[derive(Debug)]
pub(crate) struct Liveness {
    alive: watch::Sender<bool>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    pub(crate) fn new() -> Self {
        let (alive, _) = watch::channel(true);
        Self { alive }
    }

    pub(crate) fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    /// End it; returns whether it was alive
    pub(crate) fn end(&self) -> bool {
        self.alive.send_replace(false)
    }

    pub(crate) async fn ended(&self) {
        let mut alive = self.alive.subscribe();
        let _ = alive.wait_for(|alive| !alive).await;
    }
}
