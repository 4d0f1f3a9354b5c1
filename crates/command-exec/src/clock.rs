use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{oneshot, Notify};

// ─── Clock ────────────────────────────────────────────────────────────────

/// Source of timers for bounded command execution.
///
/// Production code uses [`WallClock`]; tests inject a [`ManualClock`] so that
/// a timeout fires exactly when the test says so.
pub trait Clock: Send + Sync {
    /// Returns a future that resolves once `d` has elapsed on this clock.
    ///
    /// The timer is registered when `after` is called, not when the returned
    /// future is first polled.
    fn after(&self, d: Duration) -> BoxFuture<'static, ()>;
}

/// Real time, backed by the Tokio timer wheel.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn after(&self, d: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(d))
    }
}

// ─── ManualClock ──────────────────────────────────────────────────────────

/// A clock that only moves when [`ManualClock::advance`] is called.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
    registered: Arc<Notify>,
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    started: usize,
    timers: Vec<PendingTimer>,
}

#[derive(Debug)]
struct PendingTimer {
    deadline: Duration,
    fire: oneshot::Sender<()>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `d`, firing every timer whose deadline has
    /// been reached.
    pub fn advance(&self, d: Duration) {
        let due = {
            let mut state = self.lock();
            state.now += d;
            let now = state.now;
            let (due, waiting): (Vec<_>, Vec<_>) =
                state.timers.drain(..).partition(|t| t.deadline <= now);
            state.timers = waiting;
            due
        };
        for timer in due {
            let _ = timer.fire.send(());
        }
    }

    /// Total number of timers ever requested from this clock.
    pub fn timers_started(&self) -> usize {
        self.lock().started
    }

    /// Timers that have neither fired nor been dropped by their owner.
    pub fn pending_timers(&self) -> usize {
        self.lock()
            .timers
            .iter()
            .filter(|t| !t.fire.is_closed())
            .count()
    }

    /// Wait until at least `count` timers have been requested.
    pub async fn wait_for_timers(&self, count: usize) {
        loop {
            let notified = self.registered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.timers_started() >= count {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        match self.inner.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Clock for ManualClock {
    fn after(&self, d: Duration) -> BoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock();
            state.started += 1;
            if d.is_zero() {
                let _ = tx.send(());
            } else {
                let deadline = state.now + d;
                state.timers.push(PendingTimer { deadline, fire: tx });
            }
        }
        self.registered.notify_waiters();

        Box::pin(async move {
            // A dropped clock never fires.
            if rx.await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
    }
}
