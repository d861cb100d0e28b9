//! Orchestrator Events
//!
//! Observers (the daemon's log, tests) subscribe to an [`EventBus`] and get
//! their own unbounded channel. Emitting never blocks; subscribers whose
//! receiver was dropped are pruned on the next emit.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Why the orchestrator is restarting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartReason {
    /// `restart()` or `request_restart()` was called
    Requested,
    /// The number of attached displays changed
    TopologyChanged {
        /// Displays at the start of the run
        before: usize,
        /// Displays seen by the watch
        after: usize,
    },
}

/// Something observable happened
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// All sessions of a run are up and their loops are about to start
    SessionsLaunched {
        /// Run counter, starting at 1
        run: u64,
        /// Displays being driven
        displays: usize,
    },
    /// A page finished preloading on an off-air surface
    ContentLoaded {
        /// Display index
        display: usize,
        /// Surface index within the display's pool
        surface: usize,
        /// Page URL
        url: String,
    },
    /// A surface went on air
    ContentShown {
        /// Display index
        display: usize,
        /// Surface index within the display's pool
        surface: usize,
        /// Page URL
        url: String,
    },
    /// The current run is being torn down for a restart
    Restarting {
        /// Cause
        reason: RestartReason,
    },
    /// `start()` is about to return
    Stopped,
}

/// Fan-out of [`OrchestratorEvent`]s to any number of subscribers
#[derive(Clone, Debug, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<OrchestratorEvent>>>>,
}

impl EventBus {
    /// Create a bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OrchestratorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber
    pub fn emit(&self, event: OrchestratorEvent) {
        tracing::trace!(?event, "Orchestrator event");
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers (as of the last emit)
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
