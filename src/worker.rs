//! Workers and the ordered pending-task queue.
//!
//! A worker is an execution context created by (and exclusively owned by) one
//! [`VirtualTimeScheduler`](crate::VirtualTimeScheduler). Tasks may be
//! scheduled onto it from any thread; they run synchronously on whichever
//! thread advances the scheduler's clock, in `(due, seq)` order.
//!
//! # Determinism Guarantees
//!
//! - Same advance target, same queue contents, same execution order
//! - Ties on due time break by scheduling order (`seq`), independent of the
//!   scheduling thread or owning worker
//! - Cancellation is lazy at the heap level: cancelled entries are skipped
//!   and dropped when they surface at the top

use crate::capability::{OneShotAction, PeriodicAction, SchedulerWorker, TaskHandle};
use crate::error::{Result, SchedulerError};
use crate::scheduler::SchedulerCore;
use crate::types::VirtualInstant;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{self, AtomicBool};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The payload of a scheduled task.
pub(crate) enum TaskKind {
    /// Runs once and is dropped.
    Once(OneShotAction),
    /// Runs once per period boundary; `period` is in nanoseconds.
    Periodic {
        /// The recurring action.
        action: PeriodicAction,
        /// Distance between occurrences, in nanoseconds.
        period: u64,
    },
}

/// A queued unit of work, ordered by `(due, seq)`.
pub(crate) struct ScheduledTask {
    /// Scheduler-wide sequence number, assigned at scheduling time.
    /// Used only as a tie-break for equal due times.
    pub(crate) seq: u64,
    /// Absolute virtual due time.
    pub(crate) due: VirtualInstant,
    /// The work to run.
    pub(crate) kind: TaskKind,
    /// Shared cancellation flag; for periodic tasks the same handle covers
    /// every occurrence.
    pub(crate) handle: TaskHandle,
}

impl ScheduledTask {
    pub(crate) const fn is_periodic(&self) -> bool {
        matches!(self.kind, TaskKind::Periodic { .. })
    }
}

impl Eq for ScheduledTask {}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap ordering: earliest due time first, then lowest seq.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shared state behind a [`VirtualWorker`].
pub(crate) struct WorkerInner {
    /// The owning scheduler's shared core (clock, sequence counter, shutdown
    /// flag). Shared, not owned.
    core: Arc<SchedulerCore>,
    /// Pending tasks, ordered by `(due, seq)`.
    queue: Mutex<BinaryHeap<ScheduledTask>>,
    /// Set once the worker is disposed; terminal.
    disposed: AtomicBool,
}

impl WorkerInner {
    pub(crate) fn new(core: Arc<SchedulerCore>) -> Self {
        Self {
            core,
            queue: Mutex::new(BinaryHeap::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(atomic::Ordering::Acquire)
    }

    /// Enqueues a new task due after `delay`, assigning a fresh sequence
    /// number and cancellation handle.
    fn push_new(&self, kind: TaskKind, delay: Duration) -> Result<TaskHandle> {
        let handle = TaskHandle::new();
        let due = self.core.clock().now().saturating_add(delay);
        self.push(kind, due, handle.clone())?;
        Ok(handle)
    }

    /// Enqueues a task at an absolute due time under an existing handle.
    ///
    /// Used both for first-time scheduling and for periodic successors, which
    /// keep their series handle but receive a fresh sequence number.
    pub(crate) fn push(
        &self,
        kind: TaskKind,
        due: VirtualInstant,
        handle: TaskHandle,
    ) -> Result<()> {
        if self.core.is_shutdown() || self.is_disposed() {
            return Err(SchedulerError::SchedulerShutdown);
        }
        let seq = self.core.next_seq();
        let mut queue = self.queue.lock().expect("worker queue poisoned");
        // Re-check under the lock so a concurrent dispose cannot leave a
        // task stranded in a queue it already cleared.
        if self.core.is_shutdown() || self.is_disposed() {
            return Err(SchedulerError::SchedulerShutdown);
        }
        tracing::trace!(seq, due = %due, "task scheduled");
        queue.push(ScheduledTask {
            seq,
            due,
            kind,
            handle,
        });
        Ok(())
    }

    /// Returns the `(due, seq)` key of the earliest pending task eligible at
    /// `target`, dropping cancelled entries that surface at the top.
    ///
    /// Tasks are eligible at `due <= target`, with one exception: a periodic
    /// entry at or past the sequence `watermark` (a successor enqueued after
    /// the current advance began) is held back when it falls exactly on
    /// `target`. An advance spanning N periods then fires exactly N
    /// occurrences instead of N + 1, while anything already pending when the
    /// advance began still runs at the target, periodic or not.
    pub(crate) fn next_due_key(
        &self,
        target: VirtualInstant,
        watermark: u64,
    ) -> Option<(VirtualInstant, u64)> {
        if self.is_disposed() {
            return None;
        }
        let mut queue = self.queue.lock().expect("worker queue poisoned");
        while let Some(task) = queue.peek() {
            if task.handle.is_cancelled() {
                tracing::trace!(seq = task.seq, "dropping cancelled task");
                queue.pop();
            } else {
                break;
            }
        }
        // Scan rather than peek: a held-back periodic successor at the
        // target can sit above an eligible task sharing its due time.
        queue
            .iter()
            .filter(|task| {
                !task.handle.is_cancelled()
                    && task.due <= target
                    && (task.due < target || !task.is_periodic() || task.seq < watermark)
            })
            .map(|task| (task.due, task.seq))
            .min()
    }

    /// Removes and returns the task with exactly the given `(due, seq)` key.
    ///
    /// Entries ordered ahead of the key (held-back or concurrently surfaced)
    /// are re-inserted untouched; cancelled entries encountered on the way
    /// are dropped. Returns `None` when the key is gone, e.g. after a
    /// concurrent cancel-and-prune; the drain loop then simply re-selects.
    pub(crate) fn pop_matching(&self, key: (VirtualInstant, u64)) -> Option<ScheduledTask> {
        if self.is_disposed() {
            return None;
        }
        let mut queue = self.queue.lock().expect("worker queue poisoned");
        let mut ahead = Vec::new();
        let mut found = None;
        while let Some(task) = queue.pop() {
            if task.handle.is_cancelled() {
                continue;
            }
            match (task.due, task.seq).cmp(&key) {
                Ordering::Less => ahead.push(task),
                Ordering::Equal => {
                    found = Some(task);
                    break;
                }
                Ordering::Greater => {
                    ahead.push(task);
                    break;
                }
            }
        }
        for task in ahead {
            queue.push(task);
        }
        found
    }

    /// Number of pending, non-cancelled tasks.
    pub(crate) fn pending_count(&self) -> usize {
        self.queue
            .lock()
            .expect("worker queue poisoned")
            .iter()
            .filter(|task| !task.handle.is_cancelled())
            .count()
    }

    /// Marks the worker disposed and drops every queued task. Idempotent.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, atomic::Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut queue = self.queue.lock().expect("worker queue poisoned");
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        tracing::debug!(dropped, "worker disposed");
    }
}

/// An execution context bound to one virtual scheduler.
///
/// Cloning a `VirtualWorker` yields another handle to the same worker; tasks
/// scheduled through any clone land in the same queue.
///
/// # Example
///
/// ```
/// use std::sync::mpsc;
/// use std::time::Duration;
/// use timelab::VirtualTimeScheduler;
///
/// let scheduler = VirtualTimeScheduler::new();
/// let worker = scheduler.create_worker();
/// let (tx, rx) = mpsc::channel();
///
/// let handle = worker
///     .schedule(move || tx.send(()).unwrap(), Duration::from_millis(10))
///     .unwrap();
/// handle.cancel();
///
/// scheduler.advance_by(Duration::from_millis(10));
/// assert!(rx.try_recv().is_err()); // cancelled before it became due
/// ```
#[derive(Clone)]
pub struct VirtualWorker {
    inner: Arc<WorkerInner>,
}

impl VirtualWorker {
    pub(crate) fn from_inner(inner: Arc<WorkerInner>) -> Self {
        Self { inner }
    }

    /// Schedules `action` to run once `delay` has elapsed on the owning
    /// scheduler's clock.
    pub fn schedule<F>(&self, action: F, delay: Duration) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.push_new(TaskKind::Once(Box::new(action)), delay)
    }

    /// Schedules `action` to run first after `initial_delay`, then once per
    /// `period` thereafter.
    ///
    /// Each firing enqueues exactly one successor at the previous due time
    /// plus `period`; a clock jump spanning several periods drains the
    /// occurrences one at a time, preserving total ordering with any other
    /// tasks due in the window. The returned handle cancels the whole series.
    pub fn schedule_periodically<F>(
        &self,
        action: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskHandle>
    where
        F: FnMut() + Send + 'static,
    {
        let period_nanos = u64::try_from(period.as_nanos()).unwrap_or(u64::MAX);
        self.inner.push_new(
            TaskKind::Periodic {
                action: Box::new(action),
                period: period_nanos,
            },
            initial_delay,
        )
    }

    /// Disposes the worker, cancelling every queued task. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Returns true once the worker has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl SchedulerWorker for VirtualWorker {
    fn schedule(&self, action: OneShotAction, delay: Duration) -> Result<TaskHandle> {
        self.inner.push_new(TaskKind::Once(action), delay)
    }

    fn schedule_periodically(
        &self,
        action: PeriodicAction,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskHandle> {
        let period_nanos = u64::try_from(period.as_nanos()).unwrap_or(u64::MAX);
        self.inner.push_new(
            TaskKind::Periodic {
                action,
                period: period_nanos,
            },
            initial_delay,
        )
    }

    fn dispose(&self) {
        self.inner.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

#[cfg(test)]
mod tests {
    use crate::scheduler::VirtualTimeScheduler;
    use crate::SchedulerError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counter_action(counter: &Arc<AtomicUsize>) -> impl FnMut() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn schedule_after_worker_dispose_fails() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        worker.dispose();
        let err = worker.schedule(|| {}, Duration::ZERO).unwrap_err();
        assert_eq!(err, SchedulerError::SchedulerShutdown);
    }

    #[test]
    fn schedule_after_scheduler_dispose_fails() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        scheduler.dispose();
        let err = worker.schedule(|| {}, Duration::ZERO).unwrap_err();
        assert_eq!(err, SchedulerError::SchedulerShutdown);
    }

    #[test]
    fn dispose_drops_pending_tasks() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut action = counter_action(&counter);
        worker
            .schedule(move || action(), Duration::from_secs(1))
            .unwrap();
        assert_eq!(scheduler.pending_tasks(), 1);

        worker.dispose();
        worker.dispose(); // idempotent
        assert_eq!(scheduler.pending_tasks(), 0);

        scheduler.advance_by(Duration::from_secs(2));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancelled_task_never_runs_even_when_overdue() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut action = counter_action(&counter);
        let handle = worker
            .schedule(move || action(), Duration::from_secs(1))
            .unwrap();

        // The task is already overdue relative to the advance target when we
        // cancel; it must still not run.
        handle.cancel();
        scheduler.advance_by(Duration::from_secs(5));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[test]
    fn clones_schedule_onto_the_same_queue() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        let clone = worker.clone();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut a = counter_action(&counter);
        let mut b = counter_action(&counter);
        worker.schedule(move || a(), Duration::from_secs(1)).unwrap();
        clone.schedule(move || b(), Duration::from_secs(1)).unwrap();
        assert_eq!(scheduler.pending_tasks(), 2);

        scheduler.advance_by(Duration::from_secs(1));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_scheduling_is_safe() {
        let scheduler = Arc::new(VirtualTimeScheduler::new());
        let worker = scheduler.create_worker();
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let worker = worker.clone();
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let counter = Arc::clone(&counter);
                        worker
                            .schedule(
                                move || {
                                    counter.fetch_add(1, Ordering::SeqCst);
                                },
                                Duration::from_millis(1),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        scheduler.advance_by(Duration::from_millis(1));
        assert_eq!(counter.load(Ordering::SeqCst), 800);
        assert_eq!(scheduler.pending_tasks(), 0);
    }
}
