//! Display topology watch
//!
//! Polls the display enumerator on the shared scheduler and reports when the
//! run should be torn down: a restart was requested, or the number of
//! attached displays changed since the run started.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::render::DisplayEnumerator;
use crate::scheduler::Scheduler;

/// Shared "restart after this run" flag
#[derive(Clone, Debug, Default)]
pub struct RestartFlag(Arc<AtomicBool>);

impl RestartFlag {
    /// Ask for a restart
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a restart was asked for
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Why the watch stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The restart flag was set
    RestartRequested,
    /// The display count differs from the one the run started with
    TopologyChanged {
        /// Displays at the start of the run
        before: usize,
        /// Displays seen now
        after: usize,
    },
    /// The scheduler was closed
    Interrupted,
}

/// Periodic display-count check
pub struct TopologyWatch {
    scheduler: Scheduler,
    enumerator: Arc<dyn DisplayEnumerator>,
    known: usize,
    interval: Duration,
    restart: RestartFlag,
}

impl TopologyWatch {
    /// Watch for changes from `known` displays every `interval`
    #[must_use]
    pub fn new(
        scheduler: Scheduler,
        enumerator: Arc<dyn DisplayEnumerator>,
        known: usize,
        interval: Duration,
        restart: RestartFlag,
    ) -> Self {
        Self {
            scheduler,
            enumerator,
            known,
            interval,
            restart,
        }
    }

    /// Poll until something calls for a restart or the scheduler closes
    pub async fn run(self) -> WatchOutcome {
        loop {
            if self.scheduler.sleep(self.interval).await.is_err() {
                return WatchOutcome::Interrupted;
            }
            if self.restart.is_requested() {
                tracing::info!("Restart requested");
                return WatchOutcome::RestartRequested;
            }

            match self.enumerator.list().await {
                Ok(displays) if displays.len() != self.known => {
                    tracing::info!(
                        before = self.known,
                        after = displays.len(),
                        "Display topology changed"
                    );
                    return WatchOutcome::TopologyChanged {
                        before: self.known,
                        after: displays.len(),
                    };
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%error, "Display enumeration failed, will retry");
                }
            }
        }
    }
}
