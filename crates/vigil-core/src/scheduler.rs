//! Abstract timer scheduling.
//!
//! Escalation, snooze expiry, queue-drain ticks, and delivery retries are
//! all driven through the [`Scheduler`] seam: real tokio timers in
//! production ([`TokioScheduler`]), a virtual clock in tests (the
//! `mock-channel` crate's `ManualScheduler`). Cancellation is explicit and
//! idempotent; cancelling a handle that already fired is a no-op.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::SchedulingError;

/// A boxed task to run when a timer fires.
pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Opaque handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Construct a handle from a raw id. For scheduler implementations.
    pub fn from_id(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Timer scheduling seam.
pub trait Scheduler: Send + Sync {
    /// Run `task` after `delay`. The returned handle can cancel the timer
    /// up until it fires. On failure the caller logs and leaves its own
    /// state unchanged; no timer is armed.
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle, SchedulingError>;

    /// Cancel a pending timer. No-op if the timer already fired or was
    /// already cancelled.
    fn cancel(&self, handle: &TimerHandle);
}

/// Production scheduler backed by tokio timers.
///
/// Each scheduled task becomes a spawned tokio task sleeping for the delay;
/// cancellation aborts the task. Scheduling fails with
/// [`SchedulingError::Timer`] outside a tokio runtime.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    inner: Arc<TokioSchedulerInner>,
}

#[derive(Default)]
struct TokioSchedulerInner {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, tokio::task::JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers that have not fired or been cancelled yet.
    pub fn pending(&self) -> usize {
        let mut tasks = self.inner.tasks.lock().expect("scheduler lock poisoned");
        tasks.retain(|_, join| !join.is_finished());
        tasks.len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle, SchedulingError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| SchedulingError::Timer(err.to_string()))?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);

        let join = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            // Drop our own entry so the map does not accumulate fired timers.
            inner.tasks.lock().expect("scheduler lock poisoned").remove(&id);
        });

        self.inner
            .tasks
            .lock()
            .expect("scheduler lock poisoned")
            .insert(id, join);
        Ok(TimerHandle(id))
    }

    fn cancel(&self, handle: &TimerHandle) {
        let removed = self
            .inner
            .tasks
            .lock()
            .expect("scheduler lock poisoned")
            .remove(&handle.0);
        if let Some(join) = removed {
            join.abort();
        }
    }
}
