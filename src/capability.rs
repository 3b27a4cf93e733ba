//! The scheduler capability contract.
//!
//! Pipeline code that needs an execution context programs against these
//! traits, never against a concrete scheduler. Two implementations exist: the
//! deterministic [`VirtualTimeScheduler`](crate::VirtualTimeScheduler) and
//! the thread-backed [`ThreadScheduler`](crate::ThreadScheduler) the category
//! accessors fall back to when no override is active. Keeping the contract
//! object-safe is what lets the override registry swap one for the other
//! behind an `Arc<dyn Scheduler>` without the pipeline noticing.

use crate::error::Result;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A one-shot unit of work.
pub type OneShotAction = Box<dyn FnOnce() + Send + 'static>;

/// A recurring unit of work, invoked once per period boundary.
pub type PeriodicAction = Box<dyn FnMut() + Send + 'static>;

/// An execution-context provider.
///
/// A scheduler hands out [`SchedulerWorker`]s, each holding its own ordered
/// queue of pending tasks. Disposing the scheduler disposes every worker it
/// created; disposal is idempotent and terminal.
pub trait Scheduler: Send + Sync {
    /// Creates a new worker bound to this scheduler.
    fn create_worker(&self) -> Arc<dyn SchedulerWorker>;

    /// Shuts the scheduler down, disposing every live worker it created.
    fn dispose(&self);

    /// Returns true once [`dispose`](Scheduler::dispose) has been called.
    fn is_disposed(&self) -> bool;

    /// Upcast for callers that need to detect the concrete variant.
    fn as_any(&self) -> &dyn Any;
}

/// An execution context holding an ordered queue of pending tasks.
///
/// Workers may be scheduled onto from any thread. Disposing a worker cancels
/// every not-yet-executed task it holds; an action already running when
/// `dispose` is called is not interrupted.
pub trait SchedulerWorker: Send + Sync {
    /// Schedules `action` to run once `delay` has elapsed on the scheduler's
    /// clock.
    ///
    /// Fails with [`SchedulerError::SchedulerShutdown`] if the worker or its
    /// parent scheduler is disposed.
    ///
    /// [`SchedulerError::SchedulerShutdown`]: crate::SchedulerError::SchedulerShutdown
    fn schedule(&self, action: OneShotAction, delay: Duration) -> Result<TaskHandle>;

    /// Schedules `action` to run first after `initial_delay`, then once per
    /// `period` boundary thereafter.
    ///
    /// The returned handle cancels the entire series.
    fn schedule_periodically(
        &self,
        action: PeriodicAction,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskHandle>;

    /// Disposes the worker, cancelling every queued task. Idempotent.
    fn dispose(&self);

    /// Returns true once the worker has been disposed.
    fn is_disposed(&self) -> bool;
}

/// Cancellation handle for a scheduled task.
///
/// Cancellation is cooperative and immediate at the queue level: a cancelled
/// task is removed from consideration and its action never runs, even if its
/// due time has already passed. For a periodic task the handle covers every
/// future occurrence.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    /// Creates a fresh, uncancelled handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the task (or periodic series). Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true if [`cancel`](TaskHandle::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_cancel_is_idempotent() {
        let handle = TaskHandle::new();
        assert!(!handle.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let handle = TaskHandle::new();
        let clone = handle.clone();
        clone.cancel();
        assert!(handle.is_cancelled());
    }
}
