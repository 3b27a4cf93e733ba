//! Verification-harness entry point for virtual-time tests.
//!
//! [`with_virtual_time`] wraps the install → run → tear-down dance a
//! virtual-time test performs against the process-wide registry: it installs
//! an override (a caller-provided scheduler or a fresh default), hands the
//! scheduler to the test closure, which builds its pipeline and advances
//! time as its assertions direct, and on the way out disposes the scheduler
//! and clears the registry, even when the closure panics. A failing test
//! therefore never leaks its override into the next one.

use crate::registry::OverrideRegistry;
use crate::scheduler::VirtualTimeScheduler;
use std::sync::Arc;
use std::time::Duration;

/// Options for a [`with_virtual_time`] run.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use timelab::HarnessOptions;
///
/// let options = HarnessOptions::new().budget(Duration::from_secs(30));
/// ```
#[derive(Default)]
pub struct HarnessOptions {
    /// Constructs the scheduler to install; `None` installs a default.
    scheduler_factory: Option<Box<dyn FnOnce() -> Arc<VirtualTimeScheduler>>>,
    /// Virtual duration to advance by after the closure returns, letting
    /// straggler tasks drain without the closure driving them explicitly.
    budget: Option<Duration>,
}

impl HarnessOptions {
    /// Creates options installing a fresh default scheduler with no
    /// after-run budget.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies the scheduler to install instead of a default one.
    #[must_use]
    pub fn scheduler_factory(
        mut self,
        factory: impl FnOnce() -> Arc<VirtualTimeScheduler> + 'static,
    ) -> Self {
        self.scheduler_factory = Some(Box::new(factory));
        self
    }

    /// Sets a virtual duration to advance by after the closure returns.
    #[must_use]
    pub const fn budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// Tear-down guard: disposes the scheduler and clears the registry slot,
/// also on panic.
struct OverrideGuard<'a> {
    registry: &'a OverrideRegistry,
    scheduler: Arc<VirtualTimeScheduler>,
}

impl Drop for OverrideGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.dispose();
        // Disposal already makes the slot stale; reset also covers the case
        // where the slot holds a different (racing) instance.
        self.registry.reset();
    }
}

/// Runs `test` with a virtual-time override installed on the process-wide
/// registry.
///
/// The override is installed first-wins: if another override is already live,
/// `test` receives that instance instead and tear-down disposes it. Returns
/// whatever the closure returns.
///
/// # Example
///
/// ```
/// use std::sync::mpsc;
/// use std::time::Duration;
/// use timelab::{with_virtual_time, HarnessOptions};
///
/// let received = with_virtual_time(HarnessOptions::new(), |scheduler| {
///     let worker = scheduler.create_worker();
///     let (tx, rx) = mpsc::channel();
///     worker
///         .schedule(move || tx.send("late").unwrap(), Duration::from_secs(5))
///         .unwrap();
///     scheduler.advance_by(Duration::from_secs(5));
///     rx.try_recv().unwrap()
/// });
/// assert_eq!(received, "late");
/// ```
pub fn with_virtual_time<F, R>(options: HarnessOptions, test: F) -> R
where
    F: FnOnce(&Arc<VirtualTimeScheduler>) -> R,
{
    with_virtual_time_on(OverrideRegistry::global(), options, test)
}

/// [`with_virtual_time`] against an explicit registry.
///
/// Lets callers that manage their own registry (rather than the process-wide
/// one) reuse the same install/run/tear-down lifecycle.
pub fn with_virtual_time_on<F, R>(registry: &OverrideRegistry, options: HarnessOptions, test: F) -> R
where
    F: FnOnce(&Arc<VirtualTimeScheduler>) -> R,
{
    let scheduler = match options.scheduler_factory {
        Some(factory) => registry.get_or_set(factory()),
        None => registry.get_or_set_default(),
    };
    tracing::debug!("virtual-time harness installed override");
    let guard = OverrideGuard {
        registry,
        scheduler: Arc::clone(&scheduler),
    };
    let result = test(&scheduler);
    if let Some(budget) = options.budget {
        scheduler.advance_by(budget);
    }
    drop(guard);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn installs_runs_and_tears_down() {
        let registry = OverrideRegistry::new();
        let scheduler_out = with_virtual_time_on(&registry, HarnessOptions::new(), |scheduler| {
            assert!(registry.is_enabled());
            assert!(!scheduler.is_disposed());
            Arc::clone(scheduler)
        });
        assert!(!registry.is_enabled());
        assert!(scheduler_out.is_disposed());
    }

    #[test]
    fn uses_the_provided_factory() {
        let registry = OverrideRegistry::new();
        let mine = Arc::new(VirtualTimeScheduler::new());
        let theirs = Arc::clone(&mine);
        let options = HarnessOptions::new().scheduler_factory(move || theirs);
        with_virtual_time_on(&registry, options, |scheduler| {
            assert!(Arc::ptr_eq(scheduler, &mine));
        });
        assert!(mine.is_disposed());
    }

    #[test]
    fn budget_drains_stragglers_after_the_closure() {
        let registry = OverrideRegistry::new();
        let (tx, rx) = mpsc::channel();
        let options = HarnessOptions::new().budget(Duration::from_secs(10));
        with_virtual_time_on(&registry, options, |scheduler| {
            let worker = scheduler.create_worker();
            worker
                .schedule(move || tx.send(()).unwrap(), Duration::from_secs(7))
                .unwrap();
            // The closure never advances; the budget does.
        });
        rx.try_recv().unwrap();
    }

    #[test]
    fn tears_down_on_panic() {
        let registry = OverrideRegistry::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            with_virtual_time_on(&registry, HarnessOptions::new(), |_| {
                panic!("pipeline assertion failed");
            });
        }));
        assert!(result.is_err());
        assert!(!registry.is_enabled());
    }
}
