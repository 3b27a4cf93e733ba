//! Shared helpers for unit and integration tests.
//!
//! - Consistent tracing-based logging initialization
//! - A process-wide lock serializing tests that touch the global registry
//!
//! # Example
//!
//! ```
//! use timelab::test_utils::{init_test_logging, registry_lock};
//!
//! fn my_registry_test() {
//!     init_test_logging();
//!     let _guard = registry_lock();
//!     // drive OverrideRegistry::global() without racing other tests
//! }
//! ```

use std::sync::{Mutex, MutexGuard, Once, PoisonError};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
static REGISTRY_LOCK: Mutex<()> = Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the process-wide lock for tests that install, reset, or read the
/// global override registry.
///
/// Cargo runs tests on parallel threads, and the global registry is shared
/// process state; tests driving it must serialize or they observe each
/// other's overrides. The lock shrugs off poisoning so one failing test does
/// not cascade.
pub fn registry_lock() -> MutexGuard<'static, ()> {
    REGISTRY_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}
