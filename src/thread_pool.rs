//! The real, thread-backed scheduler the category accessors fall back to.
//!
//! This is the non-deterministic counterpart of the virtual scheduler: each
//! worker owns a dedicated timer thread draining a deadline-ordered queue
//! against the wall clock. Pipelines never name this type directly; they
//! receive it through the category accessors whenever no override is active,
//! behind the same [`Scheduler`] contract the virtual variant satisfies.
//!
//! Cancellation is soft, mirroring the virtual scheduler: a cancelled entry
//! is skipped when it surfaces, but an action already running is not
//! interrupted.

use crate::capability::{OneShotAction, PeriodicAction, Scheduler, SchedulerWorker, TaskHandle};
use crate::error::{Result, SchedulerError};
use crate::registry::SchedulerCategory;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
use std::sync::{atomic, Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Worker-thread name counter, per process.
static WORKER_SEQ: AtomicUsize = AtomicUsize::new(0);

enum EntryKind {
    Once(OneShotAction),
    Periodic {
        action: PeriodicAction,
        period: Duration,
    },
}

struct TimedEntry {
    deadline: Instant,
    seq: u64,
    kind: EntryKind,
    handle: TaskHandle,
}

impl Eq for TimedEntry {}

impl PartialEq for TimedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest deadline first, then insertion order.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct WorkerState {
    queue: BinaryHeap<TimedEntry>,
    disposed: bool,
}

struct ThreadWorkerInner {
    state: Mutex<WorkerState>,
    signal: Condvar,
    next_seq: AtomicU64,
}

impl ThreadWorkerInner {
    fn push(&self, kind: EntryKind, deadline: Instant, handle: TaskHandle) -> Result<()> {
        let mut state = self.state.lock().expect("timer state poisoned");
        if state.disposed {
            return Err(SchedulerError::SchedulerShutdown);
        }
        let seq = self.next_seq.fetch_add(1, atomic::Ordering::Relaxed);
        state.queue.push(TimedEntry {
            deadline,
            seq,
            kind,
            handle,
        });
        self.signal.notify_one();
        Ok(())
    }

    fn dispose(&self) {
        let mut state = self.state.lock().expect("timer state poisoned");
        if !state.disposed {
            state.disposed = true;
            let dropped = state.queue.len();
            state.queue.clear();
            tracing::debug!(dropped, "timer worker disposed");
        }
        self.signal.notify_one();
    }

    fn is_disposed(&self) -> bool {
        self.state.lock().expect("timer state poisoned").disposed
    }

    /// Timer-thread loop: sleep until the next deadline (or a queue change),
    /// run due entries, reschedule periodic successors at fixed rate.
    fn run(self: &Arc<Self>) {
        let mut state = self.state.lock().expect("timer state poisoned");
        loop {
            if state.disposed {
                return;
            }
            while state
                .queue
                .peek()
                .is_some_and(|entry| entry.handle.is_cancelled())
            {
                state.queue.pop();
            }
            let now = Instant::now();
            match state.queue.peek() {
                None => {
                    state = self.signal.wait(state).expect("timer state poisoned");
                }
                Some(entry) if entry.deadline > now => {
                    let wait = entry.deadline.duration_since(now);
                    let (guard, _) = self
                        .signal
                        .wait_timeout(state, wait)
                        .expect("timer state poisoned");
                    state = guard;
                }
                Some(_) => {
                    let entry = state.queue.pop().expect("peeked entry vanished");
                    drop(state);
                    self.run_entry(entry);
                    state = self.state.lock().expect("timer state poisoned");
                }
            }
        }
    }

    fn run_entry(self: &Arc<Self>, entry: TimedEntry) {
        match entry.kind {
            EntryKind::Once(action) => action(),
            EntryKind::Periodic { mut action, period } => {
                action();
                if !entry.handle.is_cancelled() {
                    let kind = EntryKind::Periodic { action, period };
                    // Fixed-rate: next deadline counts from the previous one.
                    let _ = self.push(kind, entry.deadline + period, entry.handle);
                }
            }
        }
    }
}

/// An execution context backed by one dedicated timer thread.
pub struct ThreadWorker {
    inner: Arc<ThreadWorkerInner>,
}

impl ThreadWorker {
    fn spawn(category: SchedulerCategory, born_disposed: bool) -> Self {
        let inner = Arc::new(ThreadWorkerInner {
            state: Mutex::new(WorkerState {
                queue: BinaryHeap::new(),
                disposed: born_disposed,
            }),
            signal: Condvar::new(),
            next_seq: AtomicU64::new(0),
        });
        if !born_disposed {
            let thread_inner = Arc::clone(&inner);
            let n = WORKER_SEQ.fetch_add(1, atomic::Ordering::Relaxed);
            thread::Builder::new()
                .name(format!("timelab-{}-{n}", category.name()))
                .spawn(move || thread_inner.run())
                .expect("failed to spawn timer worker thread");
        }
        Self { inner }
    }
}

impl SchedulerWorker for ThreadWorker {
    fn schedule(&self, action: OneShotAction, delay: Duration) -> Result<TaskHandle> {
        let handle = TaskHandle::new();
        self.inner.push(
            EntryKind::Once(action),
            Instant::now() + delay,
            handle.clone(),
        )?;
        Ok(handle)
    }

    fn schedule_periodically(
        &self,
        action: PeriodicAction,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskHandle> {
        let handle = TaskHandle::new();
        self.inner.push(
            EntryKind::Periodic { action, period },
            Instant::now() + initial_delay,
            handle.clone(),
        )?;
        Ok(handle)
    }

    fn dispose(&self) {
        self.inner.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

/// A real scheduler: one dedicated timer thread per worker.
///
/// Satisfies the same [`Scheduler`] contract as the virtual variant so that
/// pipelines stay agnostic about which one the registry handed them. Work
/// here runs against the wall clock with real concurrency; nothing about it
/// is deterministic.
pub struct ThreadScheduler {
    category: SchedulerCategory,
    disposed: AtomicBool,
    workers: Mutex<Vec<Weak<ThreadWorkerInner>>>,
}

impl ThreadScheduler {
    /// Creates a scheduler for the given category.
    #[must_use]
    pub fn new(category: SchedulerCategory) -> Self {
        Self {
            category,
            disposed: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Returns the category this scheduler was constructed for.
    #[must_use]
    pub const fn category(&self) -> SchedulerCategory {
        self.category
    }
}

impl Scheduler for ThreadScheduler {
    fn create_worker(&self) -> Arc<dyn SchedulerWorker> {
        let born_disposed = self.disposed.load(atomic::Ordering::Acquire);
        let worker = ThreadWorker::spawn(self.category, born_disposed);
        let mut workers = self.workers.lock().expect("worker list poisoned");
        workers.retain(|weak| weak.strong_count() > 0);
        workers.push(Arc::downgrade(&worker.inner));
        drop(workers);
        if self.disposed.load(atomic::Ordering::Acquire) {
            worker.inner.dispose();
        }
        Arc::new(worker)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, atomic::Ordering::AcqRel) {
            return;
        }
        let workers: Vec<_> = self
            .workers
            .lock()
            .expect("worker list poisoned")
            .drain(..)
            .collect();
        for worker in workers.iter().filter_map(Weak::upgrade) {
            worker.dispose();
        }
        tracing::debug!(category = self.category.name(), "thread scheduler disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(atomic::Ordering::Acquire)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn runs_a_delayed_task() {
        let scheduler = ThreadScheduler::new(SchedulerCategory::Single);
        assert_eq!(scheduler.category(), SchedulerCategory::Single);
        let worker = scheduler.create_worker();
        let (tx, rx) = mpsc::channel();
        worker
            .schedule(
                Box::new(move || tx.send(42).unwrap()),
                Duration::from_millis(10),
            )
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        scheduler.dispose();
    }

    #[test]
    fn cancelled_task_does_not_run() {
        let scheduler = ThreadScheduler::new(SchedulerCategory::Parallel);
        let worker = scheduler.create_worker();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = worker
            .schedule(
                Box::new(move || tx.send(()).unwrap()),
                Duration::from_millis(100),
            )
            .unwrap();
        handle.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        scheduler.dispose();
    }

    #[test]
    fn periodic_task_repeats_until_cancelled() {
        let scheduler = ThreadScheduler::new(SchedulerCategory::Elastic);
        let worker = scheduler.create_worker();
        let (tx, rx) = mpsc::channel();
        let handle = worker
            .schedule_periodically(
                Box::new(move || {
                    let _ = tx.send(());
                }),
                Duration::ZERO,
                Duration::from_millis(5),
            )
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.cancel();
        scheduler.dispose();
    }

    #[test]
    fn schedule_after_dispose_fails() {
        let scheduler = ThreadScheduler::new(SchedulerCategory::Single);
        let worker = scheduler.create_worker();
        scheduler.dispose();
        assert!(worker.is_disposed());
        let err = worker
            .schedule(Box::new(|| {}), Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, SchedulerError::SchedulerShutdown);

        // A worker created after shutdown is born disposed and spawns no
        // thread.
        let late = scheduler.create_worker();
        assert!(late.is_disposed());
    }

    #[test]
    fn dispose_is_idempotent() {
        let scheduler = ThreadScheduler::new(SchedulerCategory::Parallel);
        scheduler.dispose();
        scheduler.dispose();
        assert!(scheduler.is_disposed());
    }
}
