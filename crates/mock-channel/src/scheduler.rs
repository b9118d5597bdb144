//! Virtual-clock scheduler for deterministic timer tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use vigil_core::{Scheduler, SchedulingError, TimerHandle, TimerTask};

struct PendingTimer {
    id: u64,
    due: Duration,
    task: TimerTask,
}

struct Inner {
    now: Duration,
    next_id: u64,
    pending: Vec<PendingTimer>,
}

/// A scheduler driven by a virtual clock.
///
/// Nothing fires on its own; [`advance`](ManualScheduler::advance) moves
/// the clock and runs every due task in due order. Tasks that schedule
/// follow-up timers (escalation chains, retries, recurring ticks) fire
/// within the same `advance` call if their due time is inside the window,
/// which makes multi-step timing scenarios fully deterministic.
#[derive(Clone)]
pub struct ManualScheduler {
    inner: Arc<Mutex<Inner>>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                now: Duration::ZERO,
                next_id: 0,
                pending: Vec::new(),
            })),
        }
    }

    /// Current virtual time since scheduler creation.
    pub fn now(&self) -> Duration {
        self.inner.lock().expect("scheduler lock poisoned").now
    }

    /// Number of timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.inner
            .lock()
            .expect("scheduler lock poisoned")
            .pending
            .len()
    }

    /// Advance the virtual clock by `delta`, running every task whose due
    /// time falls inside the window, earliest first. The clock sits at each
    /// task's due time while it runs, so durations taken inside tasks (and
    /// timers they schedule) are relative to the fire time.
    pub async fn advance(&self, delta: Duration) {
        let target = {
            let inner = self.inner.lock().expect("scheduler lock poisoned");
            inner.now + delta
        };

        loop {
            // Pull the earliest due task without holding the lock across
            // the await below.
            let task = {
                let mut inner = self.inner.lock().expect("scheduler lock poisoned");
                let idx = inner
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.id))
                    .map(|(i, _)| i);

                match idx {
                    Some(i) => {
                        let timer = inner.pending.remove(i);
                        if timer.due > inner.now {
                            inner.now = timer.due;
                        }
                        Some(timer.task)
                    }
                    None => {
                        inner.now = target;
                        None
                    }
                }
            };

            match task {
                Some(task) => task.await,
                None => break,
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle, SchedulingError> {
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        let due = inner.now + delay;
        inner.pending.push(PendingTimer { id, due, task });
        Ok(TimerHandle::from_id(id))
    }

    fn cancel(&self, handle: &TimerHandle) {
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        inner.pending.retain(|t| t.id != handle.id());
    }
}
