//! Rotation Loop
//!
//! One loop per driven display. Each iteration keeps the current page on air
//! for its air time, then swaps to the next page through the display's
//! transition:
//!
//! ```text
//!   on air: current ──────────────────────────────┐ air time (slot, -half)
//!   preload:        [lead] next → spare surface   │
//!                                                 ▼
//!   swap:   out style ─ half ─► front/in ─► blank leaving surface
//! ```
//!
//! The swap is attached to a coalescing scheduler slot, so every display
//! whose page ends in the same second swaps in the same runtime turn.
//!
//! With preloading, the next page is loaded `preparation_time` before air
//! time on the next surface of the pool, hidden by the transition's `after`
//! style. Without it, the single surface navigates at swap time.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};

use crate::config::{Page, Settings};
use crate::display::{Display, OnAir};
use crate::events::{EventBus, OrchestratorEvent};
use crate::render::{RenderError, RenderSurface, WaitPolicy, BLANK_URL};
use crate::scheduler::Scheduler;
use crate::transition::TransitionAnimation;

/// Why a rotation loop stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationExit {
    /// The display is configured to be left alone
    Ignored,
    /// The display's session went away
    Disconnected,
    /// The scheduler was closed
    Interrupted,
}

/// Log a failed render call and carry on
pub(crate) fn best_effort(index: usize, operation: &'static str, result: Result<(), RenderError>) -> bool {
    match result {
        Ok(()) => true,
        Err(error) => {
            tracing::info!(display = index, operation, %error, "Render call failed, continuing");
            false
        }
    }
}

/// Drives one display until it closes or the scheduler is closed
pub struct RotationLoop {
    display: Arc<Display>,
    scheduler: Scheduler,
    launch_page: Page,
    preparation_time: Duration,
    preload: bool,
    events: EventBus,
}

impl RotationLoop {
    /// Create a loop for `display`
    ///
    /// Preloading is used when it is enabled and the display actually got
    /// more than one surface.
    #[must_use]
    pub fn new(display: Arc<Display>, scheduler: Scheduler, settings: &Settings, events: EventBus) -> Self {
        let preload = settings.preload_enabled() && display.surfaces().len() > 1;
        Self {
            display,
            scheduler,
            launch_page: settings.launch_page(),
            preparation_time: settings.preparation_time,
            preload,
            events,
        }
    }

    /// Whether the next page is prepared on a spare surface
    #[must_use]
    pub fn preloads(&self) -> bool {
        self.preload
    }

    /// Run until the display is ignored, disconnected, or the scheduler closes
    pub async fn run(self) -> RotationExit {
        let index = self.display.index();
        tracing::debug!(display = index, preload = self.preload, "Rotation loop started");

        let mut pending_preload: Option<AbortHandle> = None;
        let exit = loop {
            if let Some(exit) = self.stop_reason() {
                break exit;
            }

            let cursor = self.display.cursor();
            let config = self.display.config();
            let current = match cursor.on_air() {
                OnAir::Launch => &self.launch_page,
                OnAir::Page(page) => &config.pages[page],
            };
            let next = &config.pages[cursor.page_index()];
            let surfaces = self.display.surfaces();
            let entering_index = cursor.next_surface_index();

            let preload = self.preload.then(|| {
                let lead = current.air_time.saturating_sub(self.preparation_time);
                let task = tokio::spawn(run_preload(
                    Preparation {
                        display: index,
                        surface_index: entering_index,
                        surface: Arc::clone(&surfaces[entering_index]),
                        url: next.url.clone(),
                        after_style: config.transition.after_style().map(str::to_string),
                    },
                    self.scheduler.clone(),
                    lead,
                    self.events.clone(),
                ));
                pending_preload = Some(task.abort_handle());
                task
            });

            let swap = Swap {
                display: index,
                scheduler: self.scheduler.clone(),
                transition: config.transition.clone(),
                leaving: Arc::clone(&surfaces[cursor.surface_index()]),
                entering: Arc::clone(&surfaces[entering_index]),
                entering_index,
                same_surface: entering_index == cursor.surface_index(),
                url: next.url.clone(),
                preload,
                events: self.events.clone(),
            };

            tracing::trace!(
                display = index,
                air_time_ms = current.air_time.as_millis(),
                next = %next.url,
                "Scheduling swap"
            );
            let offset = config.transition.schedule_offset_ms();
            let completion = self
                .scheduler
                .schedule_in(current.air_time, offset, move || swap.run());
            if completion.await.is_err() {
                break RotationExit::Interrupted;
            }
            self.display.advance();
        };

        if let Some(task) = pending_preload {
            task.abort();
        }
        tracing::debug!(display = index, ?exit, "Rotation loop stopped");
        exit
    }

    fn stop_reason(&self) -> Option<RotationExit> {
        if self.display.config().ignore {
            return Some(RotationExit::Ignored);
        }
        if self.display.is_closed() || !self.display.session().is_connected() {
            return Some(RotationExit::Disconnected);
        }
        if self.scheduler.is_closed() {
            return Some(RotationExit::Interrupted);
        }
        None
    }
}

/// A page to load onto a surface
struct Preparation {
    display: usize,
    surface_index: usize,
    surface: Arc<dyn RenderSurface>,
    url: String,
    after_style: Option<String>,
}

impl Preparation {
    /// Navigate and hide the page behind the `after` style; false if navigation failed
    async fn load(&self) -> bool {
        let navigated = self.surface.navigate(&self.url, WaitPolicy::DomContentLoaded).await;
        if !best_effort(self.display, "navigate", navigated) {
            return false;
        }
        if let Some(css) = &self.after_style {
            best_effort(self.display, "apply after style", self.surface.apply_style(css).await);
        }
        true
    }
}

/// Load ahead of air time; only this path reports `ContentLoaded`
async fn run_preload(preparation: Preparation, scheduler: Scheduler, lead: Duration, events: EventBus) -> bool {
    if scheduler.sleep(lead).await.is_err() {
        return false;
    }
    if !preparation.load().await {
        return false;
    }
    events.emit(OrchestratorEvent::ContentLoaded {
        display: preparation.display,
        surface: preparation.surface_index,
        url: preparation.url,
    });
    true
}

/// The on-air transition of one iteration
struct Swap {
    display: usize,
    scheduler: Scheduler,
    transition: TransitionAnimation,
    leaving: Arc<dyn RenderSurface>,
    entering: Arc<dyn RenderSurface>,
    entering_index: usize,
    same_surface: bool,
    url: String,
    preload: Option<JoinHandle<bool>>,
    events: EventBus,
}

impl Swap {
    async fn run(self) {
        if let Some(css) = self.transition.out_style() {
            let leaving = Arc::clone(&self.leaving);
            let css = css.to_string();
            let display = self.display;
            tokio::spawn(async move {
                best_effort(display, "apply out style", leaving.apply_style(&css).await);
            });
        }

        let half = Duration::from_millis(self.transition.half_duration_ms);
        if self.scheduler.sleep(half).await.is_err() {
            return;
        }

        let preloading = self.preload.is_some();
        let loaded = match self.preload {
            Some(task) => {
                if !task.is_finished() {
                    tracing::debug!(display = self.display, url = %self.url, "Preload still pending at air time");
                    task.abort();
                }
                // A preload cut short is redone below
                task.await.unwrap_or(false)
            }
            None => false,
        };

        if !loaded {
            Preparation {
                display: self.display,
                surface_index: self.entering_index,
                surface: Arc::clone(&self.entering),
                url: self.url.clone(),
                after_style: self.transition.after_style().map(str::to_string),
            }
            .load()
            .await;
        }

        if !self.same_surface {
            best_effort(self.display, "bring to front", self.entering.bring_to_front().await);
        }
        if let Some(css) = self.transition.in_style() {
            best_effort(self.display, "apply in style", self.entering.apply_style(css).await);
        }
        if preloading {
            best_effort(
                self.display,
                "blank leaving surface",
                self.leaving.navigate(BLANK_URL, WaitPolicy::Commit).await,
            );
        }

        self.events.emit(OrchestratorEvent::ContentShown {
            display: self.display,
            surface: self.entering_index,
            url: self.url,
        });
    }
}
