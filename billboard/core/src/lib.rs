//! Billboard Core - Synchronized Multi-Display Signage
//!
//! Drives a set of physical displays, each showing its own rotating list of
//! web pages, so that page changes on every display happen at the same
//! moment and stay aligned for days of uptime.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                             │
//! │   Settings ──► enumerate ──► launch sessions ──► surface pools    │
//! │                                                                   │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐  ┌───────────────┐  │
//! │  │ Rotation   │ │ Rotation   │ │ Rotation   │  │ Topology      │  │
//! │  │ display 0  │ │ display 1  │ │ display N  │  │ watch         │  │
//! │  └─────┬──────┘ └─────┬──────┘ └─────┬──────┘  └───────┬───────┘  │
//! │        └──────────────┴──────┬───────┴─────────────────┘          │
//! │                              ▼                                    │
//! │                 Coalescing Scheduler (one per run)                │
//! └──────────────────────────────┬───────────────────────────────────┘
//!                                │
//!          RenderBackend / RenderSession / RenderSurface traits
//!                                │
//!              headless (reqwest) │ test mocks │ your browser driver
//! ```
//!
//! # Key Types
//!
//! - [`Orchestrator`]: lifecycle of all displays (start, restart, exit)
//! - [`Scheduler`]: second-aligned, coalescing timer facility
//! - [`RotationLoop`]: per-display page rotation
//! - [`TransitionAnimation`]: style fragments for page swaps
//! - [`Settings`]: resolved configuration
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use billboard_core::{load_config, Orchestrator};
//! use billboard_core::render::{HeadlessBackend, StaticEnumerator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(None)?;
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(StaticEnumerator::default()),
//!         Arc::new(HeadlessBackend::new()),
//!     );
//!     orchestrator.start(&config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: TOML configuration, defaults, and resolved settings
//! - [`display`]: display geometry, rotation cursor, runtime display entity
//! - [`events`]: orchestrator event fan-out
//! - [`orchestrator`]: the lifecycle owner
//! - [`render`]: render backend traits and implementations
//! - [`rotation`]: per-display rotation loop
//! - [`scheduler`]: coalescing scheduler
//! - [`topology`]: display topology watch
//! - [`transition`]: transition animations

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod display;
pub mod events;
pub mod orchestrator;
pub mod render;
pub mod rotation;
pub mod scheduler;
pub mod topology;
pub mod transition;

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, merge_options, BillboardToml,
    BrowserOptions, ConfigError, ConfigOverrides, DisplayConfig, DisplayToml, Page, RotationSpeed,
    Settings, TransitionToml,
};

pub use display::{sort_displays, Display, DisplayGeometry, DisplaySnapshot, OnAir, RotationCursor};
pub use events::{EventBus, OrchestratorEvent, RestartReason};
pub use orchestrator::{Orchestrator, OrchestratorError, Phase};

// Render exports
pub use render::{
    DisplayEnumerator, LaunchOptions, RenderBackend, RenderError, RenderSession, RenderSurface,
    WaitPolicy,
};

pub use rotation::{RotationExit, RotationLoop};
pub use scheduler::{Scheduler, SchedulerInterrupt, SlotCompletion, SlotKey, WallClock};
pub use topology::{RestartFlag, TopologyWatch, WatchOutcome};
pub use transition::{TransitionAnimation, TransitionKind, TransitionStyles};
