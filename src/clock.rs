//! The monotone virtual clock.

use crate::error::{Result, SchedulerError};
use crate::types::VirtualInstant;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A monotonically advancing virtual-time counter.
///
/// The clock starts at [`VirtualInstant::ZERO`] and only moves when an
/// advance operation is called; it has no relation to wall-clock time.
/// Reading the current time is a lock-free atomic load with no side effects.
///
/// Advancing to an instant earlier than the current time is rejected with
/// [`SchedulerError::InvalidTimeTravel`]: a caller advancing backwards almost
/// always signals a test bug, so the clock fails loudly rather than clamping.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use timelab::{VirtualClock, VirtualInstant};
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), VirtualInstant::ZERO);
///
/// clock.advance_by(Duration::from_secs(1));
/// assert_eq!(clock.now(), VirtualInstant::from_secs(1));
/// ```
#[derive(Debug)]
pub struct VirtualClock {
    /// Current virtual time in nanoseconds.
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a new virtual clock starting at time zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// Creates a virtual clock starting at the given instant.
    #[must_use]
    pub const fn starting_at(instant: VirtualInstant) -> Self {
        Self {
            now: AtomicU64::new(instant.as_nanos()),
        }
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> VirtualInstant {
        VirtualInstant::from_nanos(self.now.load(Ordering::Acquire))
    }

    /// Advances the clock by the given duration, saturating at
    /// [`VirtualInstant::MAX`].
    pub fn advance_by(&self, duration: Duration) {
        loop {
            let current = self.now.load(Ordering::Acquire);
            let target = VirtualInstant::from_nanos(current)
                .saturating_add(duration)
                .as_nanos();
            if self
                .now
                .compare_exchange_weak(current, target, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Advances the clock to the given absolute instant.
    ///
    /// Fails with [`SchedulerError::InvalidTimeTravel`] if the target is
    /// earlier than the current time. Advancing to the current time is a
    /// permitted no-op.
    pub fn advance_to(&self, instant: VirtualInstant) -> Result<()> {
        let target = instant.as_nanos();
        loop {
            let current = self.now.load(Ordering::Acquire);
            if target < current {
                return Err(SchedulerError::InvalidTimeTravel {
                    current: VirtualInstant::from_nanos(current),
                    requested: instant,
                });
            }
            if self
                .now
                .compare_exchange_weak(current, target, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Moves the clock forward to `instant` if it is ahead of the current
    /// time; otherwise leaves the clock untouched.
    ///
    /// Used by the drain loop, which steps the clock through each task's due
    /// time and only ever moves forward.
    pub(crate) fn advance_to_at_least(&self, instant: VirtualInstant) {
        let target = instant.as_nanos();
        loop {
            let current = self.now.load(Ordering::Acquire);
            if current >= target {
                return;
            }
            if self
                .now
                .compare_exchange_weak(current, target, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}
