//! Error types for scheduling and time-advance operations.
//!
//! Errors are explicit and typed. There are deliberately few of them:
//!
//! - Scheduling on a disposed worker or scheduler is a hard failure, surfaced
//!   to the caller rather than silently dropped
//! - Advancing virtual time backwards signals a test bug and is rejected
//!
//! Installing an override while one is already active is *not* an error; the
//! registry defines that path as a successful no-op returning the existing
//! instance.

use crate::types::VirtualInstant;
use thiserror::Error;

/// Errors produced by the virtual-time scheduler and its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Scheduling was attempted on a disposed worker or scheduler.
    #[error("scheduler has been shut down; cannot accept new work")]
    SchedulerShutdown,

    /// A time-advance call targeted an instant earlier than the current
    /// virtual time.
    #[error("cannot advance virtual time backwards from {current} to {requested}")]
    InvalidTimeTravel {
        /// The clock's current virtual time.
        current: VirtualInstant,
        /// The rejected target instant.
        requested: VirtualInstant,
    },
}

/// Result alias for scheduling operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            SchedulerError::SchedulerShutdown.to_string(),
            "scheduler has been shut down; cannot accept new work"
        );
        let err = SchedulerError::InvalidTimeTravel {
            current: VirtualInstant::from_secs(5),
            requested: VirtualInstant::from_secs(3),
        };
        assert_eq!(
            err.to_string(),
            "cannot advance virtual time backwards from 5.000s to 3.000s"
        );
    }
}
