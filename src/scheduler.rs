//! The virtual-time scheduler: clock ownership, worker fan-out, drains.

use crate::capability::{Scheduler, SchedulerWorker, TaskHandle};
use crate::clock::VirtualClock;
use crate::error::{Result, SchedulerError};
use crate::types::VirtualInstant;
use crate::worker::{ScheduledTask, TaskKind, VirtualWorker, WorkerInner};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// State shared between a scheduler and the workers it created.
pub(crate) struct SchedulerCore {
    /// The owned virtual clock.
    clock: VirtualClock,
    /// Scheduler-wide sequence counter; ties on due time break by this.
    next_seq: AtomicU64,
    /// Set once the scheduler is disposed; terminal.
    shutdown: AtomicBool,
    /// The workers this scheduler created. Strong references: a worker is
    /// owned by its scheduler, so dropping every user-facing handle must not
    /// drop the pending tasks. Disposed workers are pruned lazily.
    workers: Mutex<Vec<Arc<WorkerInner>>>,
}

impl SchedulerCore {
    pub(crate) fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Next sequence number that would be assigned, without assigning it.
    /// Entries at or past this mark were enqueued after the caller observed
    /// it.
    pub(crate) fn seq_watermark(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed)
    }
}

/// A deterministic, fast-forwardable scheduler.
///
/// The scheduler owns a [`VirtualClock`] and the set of workers it created.
/// Advancing the clock executes every task due at or before the target
/// instant synchronously on the advancing thread, in global `(due, seq)`
/// order across all workers. Time-advance calls return only once the window
/// is fully drained, including cascades scheduled by the tasks themselves.
///
/// Disposal fans out to every live worker, is idempotent, and is terminal:
/// no operation revives a shut-down scheduler, and any override registry
/// holding it observes the disposal on its next read.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use timelab::{VirtualInstant, VirtualTimeScheduler};
///
/// let scheduler = VirtualTimeScheduler::new();
/// assert_eq!(scheduler.now(), VirtualInstant::ZERO);
///
/// scheduler.advance_by(Duration::from_secs(3));
/// assert_eq!(scheduler.now(), VirtualInstant::from_secs(3));
/// ```
pub struct VirtualTimeScheduler {
    core: Arc<SchedulerCore>,
}

impl VirtualTimeScheduler {
    /// Creates a scheduler whose clock starts at [`VirtualInstant::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_start_time(VirtualInstant::ZERO)
    }

    /// Creates a scheduler whose clock starts at the given instant.
    #[must_use]
    pub fn with_start_time(start: VirtualInstant) -> Self {
        Self {
            core: Arc::new(SchedulerCore {
                clock: VirtualClock::starting_at(start),
                next_seq: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> VirtualInstant {
        self.core.clock.now()
    }

    /// Creates a new worker bound to this scheduler's clock.
    ///
    /// The worker is registered for disposal fan-out and stays owned by the
    /// scheduler: its pending tasks survive even when every user-facing
    /// handle to it is dropped. Creating a worker never fails, but a worker
    /// created after [`dispose`](Self::dispose) is born disposed, so
    /// scheduling on it fails with [`SchedulerError::SchedulerShutdown`].
    #[must_use]
    pub fn create_worker(&self) -> VirtualWorker {
        let inner = Arc::new(WorkerInner::new(Arc::clone(&self.core)));
        self.core
            .workers
            .lock()
            .expect("worker list poisoned")
            .push(Arc::clone(&inner));
        // Close the race with a concurrent dispose: registering after the
        // fan-out list was drained would otherwise leave this worker live.
        if self.core.is_shutdown() {
            inner.dispose();
        }
        VirtualWorker::from_inner(inner)
    }

    /// Advances the clock by `duration`, draining every task due in the
    /// window.
    ///
    /// Everything pending when the call begins runs if due at or before the
    /// target, including tasks due exactly at it. The one exception is a
    /// periodic successor enqueued *during* this advance that lands exactly
    /// on the target: it stays pending for the next advance, so a jump
    /// spanning N whole periods fires exactly N occurrences.
    pub fn advance_by(&self, duration: Duration) {
        let target = self.now().saturating_add(duration);
        self.drain_until(target);
    }

    /// Advances the clock to the absolute instant `target`, draining every
    /// task due at or before it.
    ///
    /// Fails with [`SchedulerError::InvalidTimeTravel`] if `target` is
    /// earlier than the current virtual time; advancing to the current time
    /// is a permitted no-op. Window-edge semantics match
    /// [`advance_by`](Self::advance_by).
    pub fn advance_to(&self, target: VirtualInstant) -> Result<()> {
        let current = self.now();
        if target < current {
            return Err(SchedulerError::InvalidTimeTravel { current, requested: target });
        }
        self.drain_until(target);
        Ok(())
    }

    /// Advances the clock to the next pending due time, if any, draining
    /// everything due at that instant. Repeated calls always make progress.
    ///
    /// Returns the instant advanced to, or `None` (leaving the clock
    /// untouched) when no task is pending.
    pub fn advance_to_next(&self) -> Option<VirtualInstant> {
        let watermark = self.core.seq_watermark();
        let (_, (due, _)) = self.next_due_across(VirtualInstant::MAX, watermark)?;
        self.drain_until(due);
        Some(due)
    }

    /// Total number of pending, non-cancelled tasks across all live workers.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.live_workers()
            .iter()
            .map(|worker| worker.pending_count())
            .sum()
    }

    /// Shuts the scheduler down: disposes every live worker and marks the
    /// scheduler terminal. Idempotent.
    ///
    /// An override registry holding this instance observes the shutdown on
    /// its next read and treats the slot as stale.
    pub fn dispose(&self) {
        if self.core.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let workers: Vec<_> = self
            .core
            .workers
            .lock()
            .expect("worker list poisoned")
            .drain(..)
            .collect();
        for worker in &workers {
            worker.dispose();
        }
        tracing::debug!(now = %self.now(), "virtual scheduler disposed");
    }

    /// Returns true once [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.core.is_shutdown()
    }

    /// Snapshot of live workers, pruning entries disposed individually.
    fn live_workers(&self) -> Vec<Arc<WorkerInner>> {
        let mut workers = self.core.workers.lock().expect("worker list poisoned");
        workers.retain(|worker| !worker.is_disposed());
        workers.iter().map(Arc::clone).collect()
    }

    /// Finds the globally smallest eligible `(due, seq)` key at or before
    /// `target` across all live workers.
    fn next_due_across(
        &self,
        target: VirtualInstant,
        watermark: u64,
    ) -> Option<(Arc<WorkerInner>, (VirtualInstant, u64))> {
        let mut best: Option<(Arc<WorkerInner>, (VirtualInstant, u64))> = None;
        for worker in self.live_workers() {
            if let Some(key) = worker.next_due_key(target, watermark) {
                if best.as_ref().map_or(true, |(_, current)| key < *current) {
                    best = Some((worker, key));
                }
            }
        }
        best
    }

    /// Runs every task due at or before `target`, in `(due, seq)` order,
    /// then sets the clock to `target`.
    ///
    /// The clock steps through each task's due time before its action runs,
    /// so actions scheduling with relative delays compute from their own due
    /// instant. Actions run with no locks held; cascaded tasks (including
    /// periodic successors) whose due time lands inside the window join the
    /// same pass. The sequence watermark taken at entry marks which entries
    /// predate this drain; only later periodic successors are held back at
    /// the window edge.
    fn drain_until(&self, target: VirtualInstant) {
        let watermark = self.core.seq_watermark();
        let mut executed = 0_usize;
        loop {
            let Some((worker, key)) = self.next_due_across(target, watermark) else {
                break;
            };
            // Selection and pop are separate lock acquisitions; if the key
            // vanished in between, re-select.
            let Some(task) = worker.pop_matching(key) else {
                continue;
            };
            if task.handle.is_cancelled() {
                continue;
            }
            self.core.clock.advance_to_at_least(task.due);
            self.run_task(&worker, task);
            executed += 1;
        }
        self.core.clock.advance_to_at_least(target);
        tracing::debug!(executed, now = %self.now(), "virtual time advanced");
    }

    /// Runs one popped task and enqueues the periodic successor if the series
    /// is still live.
    fn run_task(&self, worker: &Arc<WorkerInner>, task: ScheduledTask) {
        let ScheduledTask {
            due, kind, handle, ..
        } = task;
        match kind {
            TaskKind::Once(action) => action(),
            TaskKind::Periodic { mut action, period } => {
                action();
                if !handle.is_cancelled() && !worker.is_disposed() && !self.core.is_shutdown() {
                    self.reschedule_periodic(worker, action, due, period, handle);
                }
            }
        }
    }

    fn reschedule_periodic(
        &self,
        worker: &Arc<WorkerInner>,
        action: Box<dyn FnMut() + Send>,
        previous_due: VirtualInstant,
        period: u64,
        handle: TaskHandle,
    ) {
        let next_due = previous_due.saturating_add_nanos(period);
        // The liveness checks above race with dispose; a failure here just
        // means the series ended, which is the disposed semantics anyway.
        let _ = worker.push(TaskKind::Periodic { action, period }, next_due, handle);
    }
}

impl Default for VirtualTimeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VirtualTimeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualTimeScheduler")
            .field("now", &self.now())
            .field("shutdown", &self.is_disposed())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

impl Scheduler for VirtualTimeScheduler {
    fn create_worker(&self) -> Arc<dyn SchedulerWorker> {
        Arc::new(Self::create_worker(self))
    }

    fn dispose(&self) {
        Self::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        Self::is_disposed(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
