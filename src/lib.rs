//! Timelab: deterministic virtual-time scheduling for testing time-dependent pipelines.
//!
//! # Overview
//!
//! Timelab provides a scheduler whose clock only moves when the test says so.
//! Work scheduled with a delay does not wait on wall-clock time; instead the
//! test advances a virtual clock, and every task due at or before the target
//! instant runs synchronously on the advancing thread, in a deterministic
//! order. A process-wide override registry lets a test substitute the virtual
//! scheduler for every "real" scheduler the system under test would otherwise
//! construct, without that system cooperating or even knowing.
//!
//! # Core Guarantees
//!
//! - **Determinism**: tasks execute in non-decreasing `(due time, sequence)`
//!   order across all workers, regardless of which thread scheduled them
//! - **Synchronous drains**: a time-advance call returns only after every task
//!   due in the window has run, including cascades those tasks schedule
//! - **No catch-up bursts**: periodic tasks fire once per period boundary even
//!   when the clock jumps several periods at once
//! - **First-wins override**: at most one override is active; installing over a
//!   live override returns the existing instance unchanged
//! - **Self-healing registry**: disposing the active override is observed
//!   synchronously; no accessor ever returns a disposed scheduler
//!
//! # Module Structure
//!
//! - [`types`]: The [`VirtualInstant`] timestamp type
//! - [`clock`]: The monotone [`VirtualClock`]
//! - [`capability`]: The scheduler capability contract shared by virtual and
//!   real implementations
//! - [`worker`]: [`VirtualWorker`] and its ordered pending-task queue
//! - [`scheduler`]: [`VirtualTimeScheduler`] lifecycle and time-advance drains
//! - [`registry`]: [`OverrideRegistry`] and the category accessors
//! - [`thread_pool`]: [`ThreadScheduler`], the real thread-backed fallback
//! - [`harness`]: [`with_virtual_time`], the verification-harness entry point
//! - [`error`]: Error types
//! - [`test_utils`]: Logging init and registry serialization for tests
//!
//! # Example
//!
//! ```
//! use std::sync::mpsc;
//! use std::time::Duration;
//! use timelab::VirtualTimeScheduler;
//!
//! let scheduler = VirtualTimeScheduler::new();
//! let worker = scheduler.create_worker();
//! let (tx, rx) = mpsc::channel();
//!
//! worker
//!     .schedule(move || tx.send("due").unwrap(), Duration::from_secs(5))
//!     .unwrap();
//!
//! assert!(rx.try_recv().is_err());
//! scheduler.advance_by(Duration::from_secs(5));
//! assert_eq!(rx.try_recv().unwrap(), "due");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod capability;
pub mod clock;
pub mod error;
pub mod harness;
pub mod registry;
pub mod scheduler;
pub mod test_utils;
pub mod thread_pool;
pub mod types;
pub mod worker;

pub use capability::{OneShotAction, PeriodicAction, Scheduler, SchedulerWorker, TaskHandle};
pub use clock::VirtualClock;
pub use error::{Result, SchedulerError};
pub use harness::{with_virtual_time, with_virtual_time_on, HarnessOptions};
pub use registry::{elastic, parallel, single, OverrideRegistry, SchedulerCategory};
pub use scheduler::VirtualTimeScheduler;
pub use thread_pool::ThreadScheduler;
pub use types::VirtualInstant;
pub use worker::VirtualWorker;
