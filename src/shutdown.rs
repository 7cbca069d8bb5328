//! Process-level abort signal raised when the camera disappears.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::error;

/// One-shot request to terminate the whole process.
///
/// Components never exit on their own; they raise the signal and the
/// composition root tears the process down.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    requested: AtomicBool,
}

impl ShutdownSignal {
    /// Create a signal that has not fired.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    /// Raise the signal. Returns `true` only for the call that fired it.
    pub fn request(&self, reason: &str) -> bool {
        let fired = self
            .requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if fired {
            error!(reason, "shutdown requested");
        }
        fired
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}
