//! The process-wide scheduler override registry.
//!
//! Pipelines obtain execution contexts through the category accessors
//! ([`parallel`], [`elastic`], [`single`]) rather than constructing
//! schedulers directly. Each accessor consults the registry first: while an
//! override is installed and live, every category collapses onto that single
//! shared [`VirtualTimeScheduler`]; otherwise the accessor falls back to a
//! real [`ThreadScheduler`] of the requested category.
//!
//! Install semantics are first-wins: only the first successful install stays
//! active, and later installs return the existing instance unchanged. The
//! registry self-heals: disposing the held scheduler is observed on the
//! next read, and a stale slot is cleared rather than ever handed out.

use crate::capability::Scheduler;
use crate::scheduler::VirtualTimeScheduler;
use crate::thread_pool::ThreadScheduler;
use std::sync::{Arc, Mutex, PoisonError};

/// The scheduler categories the rest of the system asks for.
///
/// While an override is active the distinction disappears: all three
/// categories yield the same virtual scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerCategory {
    /// Fixed-size pool sized for CPU-bound work.
    Parallel,
    /// Unbounded, growing pool for blocking or bursty work.
    Elastic,
    /// Single dedicated execution thread.
    Single,
}

impl SchedulerCategory {
    /// Returns a short name used in logs and thread names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Elastic => "elastic",
            Self::Single => "single",
        }
    }
}

/// Process-wide optional slot holding at most one override scheduler.
///
/// All slot transitions (install, stale-clear, reset) are serialized under a
/// single mutex, making the first-wins semantics atomic with respect to
/// concurrent installers: when two threads race to install, exactly one
/// instance becomes active and both callers receive the winning reference.
///
/// Most code uses the process-wide instance via
/// [`OverrideRegistry::global`]; tests that want isolation can construct
/// their own registry and pass it around explicitly.
#[derive(Debug, Default)]
pub struct OverrideRegistry {
    slot: Mutex<Option<Arc<VirtualTimeScheduler>>>,
}

impl OverrideRegistry {
    /// Creates an empty registry with no override active.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Returns the process-wide registry consulted by the free-function
    /// category accessors.
    #[must_use]
    pub fn global() -> &'static Self {
        static GLOBAL: OverrideRegistry = OverrideRegistry::new();
        &GLOBAL
    }

    /// Installs a fresh default [`VirtualTimeScheduler`] as the override,
    /// unless a live override is already active, in which case the existing
    /// instance is returned and nothing is created.
    pub fn get_or_set_default(&self) -> Arc<VirtualTimeScheduler> {
        self.get_or_set_with(|| Arc::new(VirtualTimeScheduler::new()))
    }

    /// Installs `provided` as the override, unless a live override is
    /// already active.
    ///
    /// First-wins: while an override stays live, later installs return the
    /// active instance and `provided` is neither stored nor disposed.
    pub fn get_or_set(&self, provided: Arc<VirtualTimeScheduler>) -> Arc<VirtualTimeScheduler> {
        self.get_or_set_with(move || provided)
    }

    fn get_or_set_with(
        &self,
        make: impl FnOnce() -> Arc<VirtualTimeScheduler>,
    ) -> Arc<VirtualTimeScheduler> {
        let mut slot = self.lock_slot();
        if let Some(active) = slot.as_ref() {
            if !active.is_disposed() {
                return Arc::clone(active);
            }
            tracing::debug!("replacing stale override");
        }
        let fresh = make();
        tracing::debug!("override installed");
        *slot = Some(Arc::clone(&fresh));
        fresh
    }

    /// Returns the active override if, and only if, it is live.
    ///
    /// A slot holding a disposed scheduler is cleared as a side effect, so
    /// later reads short-circuit without re-checking the dead instance.
    pub fn active(&self) -> Option<Arc<VirtualTimeScheduler>> {
        let mut slot = self.lock_slot();
        match slot.as_ref() {
            Some(scheduler) if !scheduler.is_disposed() => Some(Arc::clone(scheduler)),
            Some(_) => {
                tracing::debug!("clearing stale override");
                *slot = None;
                None
            }
            None => None,
        }
    }

    /// Returns true while a live override is active.
    ///
    /// Reflects disposal of the held scheduler synchronously: once the
    /// active override is disposed, this reports false with no other call
    /// needed in between.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.active().is_some()
    }

    /// Unconditionally clears the slot without disposing whatever was held.
    ///
    /// Safe to call when nothing is active; never fails.
    pub fn reset(&self) {
        let mut slot = self.lock_slot();
        if slot.take().is_some() {
            tracing::debug!("override reset");
        }
    }

    /// Returns a scheduler for the given category: the live override when
    /// one is active, otherwise a freshly constructed real scheduler.
    #[must_use]
    pub fn category(&self, category: SchedulerCategory) -> Arc<dyn Scheduler> {
        if let Some(scheduler) = self.active() {
            return scheduler;
        }
        Arc::new(ThreadScheduler::new(category))
    }

    /// Category accessor for [`SchedulerCategory::Parallel`].
    #[must_use]
    pub fn parallel(&self) -> Arc<dyn Scheduler> {
        self.category(SchedulerCategory::Parallel)
    }

    /// Category accessor for [`SchedulerCategory::Elastic`].
    #[must_use]
    pub fn elastic(&self) -> Arc<dyn Scheduler> {
        self.category(SchedulerCategory::Elastic)
    }

    /// Category accessor for [`SchedulerCategory::Single`].
    #[must_use]
    pub fn single(&self) -> Arc<dyn Scheduler> {
        self.category(SchedulerCategory::Single)
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<VirtualTimeScheduler>>> {
        // A panic inside a registry-driving test must not poison the slot
        // for every later test in the process.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns a parallel-category scheduler from the process-wide registry.
#[must_use]
pub fn parallel() -> Arc<dyn Scheduler> {
    OverrideRegistry::global().parallel()
}

/// Returns an elastic-category scheduler from the process-wide registry.
#[must_use]
pub fn elastic() -> Arc<dyn Scheduler> {
    OverrideRegistry::global().elastic()
}

/// Returns a single-thread-category scheduler from the process-wide
/// registry.
#[must_use]
pub fn single() -> Arc<dyn Scheduler> {
    OverrideRegistry::global().single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_virtual(scheduler: &Arc<dyn Scheduler>) -> bool {
        scheduler
            .as_any()
            .downcast_ref::<VirtualTimeScheduler>()
            .is_some()
    }

    #[test]
    fn accessors_fall_through_without_override() {
        let registry = OverrideRegistry::new();
        assert!(!registry.is_enabled());
        for scheduler in [registry.parallel(), registry.elastic(), registry.single()] {
            assert!(!is_virtual(&scheduler));
            scheduler.dispose();
        }
    }

    #[test]
    fn default_install_collapses_all_categories() {
        let registry = OverrideRegistry::new();
        let installed = registry.get_or_set_default();
        assert!(registry.is_enabled());
        assert!(!installed.is_disposed());

        for scheduler in [registry.parallel(), registry.elastic(), registry.single()] {
            assert!(is_virtual(&scheduler));
            let virtual_ref = scheduler
                .as_any()
                .downcast_ref::<VirtualTimeScheduler>()
                .unwrap();
            assert!(std::ptr::eq(virtual_ref, Arc::as_ptr(&installed)));
        }
    }

    #[test]
    fn installing_same_instance_twice_is_idempotent() {
        let registry = OverrideRegistry::new();
        let vts = Arc::new(VirtualTimeScheduler::new());

        let first = registry.get_or_set(Arc::clone(&vts));
        assert!(Arc::ptr_eq(&first, &vts));
        assert!(!vts.is_disposed());

        let second = registry.get_or_set(Arc::clone(&vts));
        assert!(Arc::ptr_eq(&second, &vts));
        assert!(!vts.is_disposed());
    }

    #[test]
    fn first_install_wins() {
        let registry = OverrideRegistry::new();
        let vts1 = Arc::new(VirtualTimeScheduler::new());
        let vts2 = Arc::new(VirtualTimeScheduler::new());

        let first = registry.get_or_set(Arc::clone(&vts1));
        let second = registry.get_or_set(Arc::clone(&vts2));

        assert!(Arc::ptr_eq(&first, &vts1));
        assert!(Arc::ptr_eq(&second, &vts1));
        assert!(Arc::ptr_eq(&registry.active().unwrap(), &vts1));
        // The loser is untouched: not stored, not disposed.
        assert!(!vts2.is_disposed());
        assert_eq!(Arc::strong_count(&vts2), 1);
    }

    #[test]
    fn disposal_flips_is_enabled_synchronously() {
        let registry = OverrideRegistry::new();
        let vts = registry.get_or_set_default();
        assert!(registry.is_enabled());

        vts.dispose();
        // No accessor call in between: the very next read observes it.
        assert!(!registry.is_enabled());
        assert!(registry.active().is_none());
    }

    #[test]
    fn accessor_after_disposal_constructs_a_real_scheduler() {
        let registry = OverrideRegistry::new();
        let vts = registry.get_or_set_default();
        vts.dispose();

        let fallback = registry.single();
        assert!(!is_virtual(&fallback));
        fallback.dispose();
    }

    #[test]
    fn stale_slot_is_replaced_by_next_install() {
        let registry = OverrideRegistry::new();
        let first = registry.get_or_set_default();
        first.dispose();

        let second = registry.get_or_set_default();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_disposed());
        assert!(registry.is_enabled());
    }

    #[test]
    fn reset_clears_without_disposing() {
        let registry = OverrideRegistry::new();
        let vts = registry.get_or_set_default();

        registry.reset();
        registry.reset(); // no-op when empty
        assert!(!registry.is_enabled());
        assert!(!vts.is_disposed());
    }

    #[test]
    fn concurrent_installs_agree_on_one_winner() {
        let registry = Arc::new(OverrideRegistry::new());
        let results: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.get_or_set(Arc::new(VirtualTimeScheduler::new()))
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        let winner = registry.active().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(result, &winner));
        }
    }
}
