//! Coalescing Scheduler
//!
//! A deliberately "flaky" timer facility: wakeups are rounded up to the next
//! full wall-clock second (plus an explicit millisecond offset), and every
//! request that lands on the same instant shares one timer. Independent
//! display loops that each ask for "wake me in 5 s" therefore fire in the same
//! runtime turn instead of drifting apart through timer jitter, even after
//! running for days.
//!
//! # Slots
//!
//! ```text
//!   schedule_in(1500ms) ──┐
//!   schedule_in(1800ms) ──┼──► slot @ 2000ms ──► one timer ──► join_all(tasks)
//!   schedule_in(1999ms) ──┘
//!   schedule_in(1800ms, offset -200) ──► slot @ 1800ms ──► separate timer
//! ```
//!
//! Targets are computed from absolute wall time, not accumulated relative
//! delays, so long runs do not drift. The offset lets callers land a known
//! number of milliseconds before a second boundary (the rotation loop uses
//! `-half_duration` so the midpoint of a transition lands on the boundary).
//!
//! # Cancellation
//!
//! [`Scheduler::close`] is the single cancellation point. Every pending sleep
//! resolves with [`SchedulerInterrupt`] exactly once, every live slot is
//! dropped without running, and all later sleeps fail immediately.

use std::collections::HashMap;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

/// Raised to every pending sleep when the scheduler is closed
///
/// This is a stop signal, not a failure. Loops awaiting the scheduler exit
/// quietly when they receive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sleep interrupted: the scheduler was closed and all pending timers were cancelled")]
pub struct SchedulerInterrupt;

/// Wall clock used to align slots to full seconds
///
/// Anchored to a wall-clock reading at creation and advanced by the runtime's
/// monotonic clock, so a paused test runtime sees deterministic wall time.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    epoch_ms: i64,
    origin: Instant,
}

impl WallClock {
    /// Anchor to the system clock
    #[must_use]
    pub fn system() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis())
    }

    /// Anchor to an arbitrary wall-clock reading (milliseconds since the epoch)
    #[must_use]
    pub fn starting_at(epoch_ms: i64) -> Self {
        Self {
            epoch_ms,
            origin: Instant::now(),
        }
    }

    /// Current wall time in whole milliseconds
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.epoch_ms.saturating_add(elapsed)
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::system()
    }
}

/// Key of a schedule slot: the target second plus the offset, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey(i64);

impl SlotKey {
    /// Round `now + delay` up to the next full second and apply `offset_ms`
    #[must_use]
    pub fn compute(now_ms: i64, delay: Duration, offset_ms: i64) -> Self {
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let target = now_ms.saturating_add(delay_ms);
        let target_second = target.div_euclid(1000) + i64::from(target.rem_euclid(1000) != 0);
        Self(target_second.saturating_mul(1000).saturating_add(offset_ms))
    }

    /// Wall time (ms) at which the slot fires
    #[must_use]
    pub fn fire_at_ms(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.0.div_euclid(1000), self.0.rem_euclid(1000))
    }
}

type SlotTask = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type SlotOutcome = Option<Result<(), SchedulerInterrupt>>;

struct Slot {
    tasks: Vec<SlotTask>,
    done: watch::Receiver<SlotOutcome>,
}

struct Inner {
    clock: WallClock,
    slots: Mutex<HashMap<SlotKey, Slot>>,
    sleeps: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    next_sleep_id: AtomicU64,
    timers_armed: AtomicU64,
    closed: AtomicBool,
}

/// Coalescing scheduler shared by every loop of one orchestrator run
///
/// Cheap to clone; clones share the same slots and pending sleeps.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("live_slots", &self.live_slots())
            .field("pending_sleeps", &self.pending_sleeps())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler aligned to the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(WallClock::system())
    }

    /// Create a scheduler aligned to the given clock
    #[must_use]
    pub fn with_clock(clock: WallClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                slots: Mutex::new(HashMap::new()),
                sleeps: Mutex::new(HashMap::new()),
                next_sleep_id: AtomicU64::new(1),
                timers_armed: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Current wall time of the scheduler's clock (ms)
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    /// Sleep for `delay`, or just yield once when `delay` is zero
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerInterrupt`] if the scheduler is closed before or
    /// while sleeping.
    pub async fn sleep(&self, delay: Duration) -> Result<(), SchedulerInterrupt> {
        let mut ticket = self.register_sleep()?;
        tokio::select! {
            biased;
            _ = &mut ticket.cancelled => Err(SchedulerInterrupt),
            () = wait(delay) => Ok(()),
        }
    }

    /// Attach `task` to the slot `delay` from now, rounded up to the next
    /// second and shifted by `offset_ms`
    ///
    /// Returns the slot's shared completion: it resolves once every task of
    /// the slot has finished, or with [`SchedulerInterrupt`] if the scheduler
    /// is closed first.
    pub fn schedule_in<F, Fut>(&self, delay: Duration, offset_ms: i64, task: F) -> SlotCompletion
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            return SlotCompletion::Ready(Err(SchedulerInterrupt));
        }

        let task: SlotTask = Box::new(move || Box::pin(task()));
        let now = self.now_ms();
        let key = SlotKey::compute(now, delay, offset_ms);

        let mut slots = self.inner.slots.lock();
        if let Some(slot) = slots.get_mut(&key) {
            slot.tasks.push(task);
            return SlotCompletion::Pending(slot.done.clone());
        }

        let (done_tx, done_rx) = watch::channel(None);
        slots.insert(
            key,
            Slot {
                tasks: vec![task],
                done: done_rx.clone(),
            },
        );
        drop(slots);

        self.inner.timers_armed.fetch_add(1, Ordering::SeqCst);
        let fire_delay = Duration::from_millis(u64::try_from(key.0 - now).unwrap_or(0));
        tracing::trace!(slot = %key, delay_ms = fire_delay.as_millis(), "Armed schedule slot");

        let scheduler = self.clone();
        tokio::spawn(async move {
            let outcome = scheduler.fire(key, fire_delay).await;
            done_tx.send_replace(Some(outcome));
        });

        SlotCompletion::Pending(done_rx)
    }

    /// Cancel every pending sleep and drop every live slot
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let cancelled: Vec<_> = self.inner.sleeps.lock().drain().collect();
        let dropped = self.inner.slots.lock().drain().count();
        tracing::debug!(
            sleeps = cancelled.len(),
            slots = dropped,
            "Scheduler closed, interrupting pending timers"
        );

        for (_, cancel) in cancelled {
            let _ = cancel.send(());
        }
    }

    /// Whether [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of slots waiting to fire
    #[must_use]
    pub fn live_slots(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Number of sleeps currently tracked for cancellation
    #[must_use]
    pub fn pending_sleeps(&self) -> usize {
        self.inner.sleeps.lock().len()
    }

    /// Number of slot timers armed since creation
    #[must_use]
    pub fn timers_armed(&self) -> u64 {
        self.inner.timers_armed.load(Ordering::SeqCst)
    }

    fn register_sleep(&self) -> Result<SleepTicket<'_>, SchedulerInterrupt> {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let id = self.inner.next_sleep_id.fetch_add(1, Ordering::SeqCst);

        let mut sleeps = self.inner.sleeps.lock();
        if self.is_closed() {
            return Err(SchedulerInterrupt);
        }
        sleeps.insert(id, cancel_tx);

        Ok(SleepTicket {
            inner: &self.inner,
            id,
            cancelled: cancel_rx,
        })
    }

    async fn fire(&self, key: SlotKey, delay: Duration) -> Result<(), SchedulerInterrupt> {
        self.sleep(delay).await?;

        // close() drains the map, so a missing slot means we were cancelled
        let slot = self.inner.slots.lock().remove(&key);
        let Some(slot) = slot else {
            return Err(SchedulerInterrupt);
        };

        tracing::trace!(slot = %key, tasks = slot.tasks.len(), "Firing schedule slot");
        join_all(slot.tasks.into_iter().map(|task| task())).await;

        if self.is_closed() {
            Err(SchedulerInterrupt)
        } else {
            Ok(())
        }
    }
}

async fn wait(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

/// Registration of one pending sleep; unregisters itself when dropped
struct SleepTicket<'a> {
    inner: &'a Inner,
    id: u64,
    cancelled: oneshot::Receiver<()>,
}

impl Drop for SleepTicket<'_> {
    fn drop(&mut self) {
        self.inner.sleeps.lock().remove(&self.id);
    }
}

/// Shared completion of a schedule slot
///
/// Await it directly or through [`wait`](Self::wait).
#[derive(Debug)]
#[must_use = "a slot completion does nothing unless awaited"]
pub enum SlotCompletion {
    /// Already resolved (the scheduler was closed)
    Ready(Result<(), SchedulerInterrupt>),
    /// Resolves when the slot's timer task publishes its outcome
    Pending(watch::Receiver<SlotOutcome>),
}

impl SlotCompletion {
    /// Wait for the slot to fire and all of its tasks to finish
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerInterrupt`] if the scheduler was closed first.
    pub async fn wait(self) -> Result<(), SchedulerInterrupt> {
        match self {
            Self::Ready(outcome) => outcome,
            Self::Pending(mut done) => match done.wait_for(Option::is_some).await {
                Ok(outcome) => (*outcome).unwrap_or(Err(SchedulerInterrupt)),
                Err(_) => Err(SchedulerInterrupt),
            },
        }
    }
}

impl IntoFuture for SlotCompletion {
    type Output = Result<(), SchedulerInterrupt>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}
