//! One-shot delayed callbacks.
//!
//! Timers live only in memory: a pending task is lost when the process exits.
//! The [`Scheduler`] trait is the seam for a durable backend.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Identifies a registered task for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`.
    fn register(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TaskHandle;

    /// Cancel a task that has not finished. Returns `false` if it already
    /// ran or was cancelled.
    fn cancel(&self, handle: TaskHandle) -> bool;

    /// Number of registered tasks that have not finished.
    fn pending(&self) -> usize;
}

/// Scheduler backed by `tokio::time::sleep`. Must be used inside a Tokio
/// runtime.
#[derive(Default)]
pub struct TokioScheduler {
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<TaskHandle, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for TokioScheduler {
    fn register(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TaskHandle {
        let handle = TaskHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let tasks = Arc::clone(&self.tasks);

        // Hold the lock across spawn so a zero-delay task cannot remove its
        // entry before it is inserted.
        let mut pending = self.tasks.lock();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            tasks.lock().remove(&handle);
        });
        pending.insert(handle, join.abort_handle());
        drop(pending);

        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(%handle, delay_ms, "Scheduled task");
        handle
    }

    fn cancel(&self, handle: TaskHandle) -> bool {
        match self.tasks.lock().remove(&handle) {
            Some(abort) => {
                abort.abort();
                tracing::debug!(%handle, "Cancelled task");
                true
            }
            None => false,
        }
    }

    fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}
