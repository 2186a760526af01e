//! Flags raised by the UI thread.

use std::sync::atomic::{AtomicBool, Ordering};

/// Cancel and confirm requests from the user.
///
/// The UI sets these from its own thread; the orchestrator polls them at the
/// points where user input matters (before a download starts and while an
/// update waits for confirmation).
#[derive(Debug, Default)]
pub struct UserSignals {
    cancel: AtomicBool,
    confirm: AtomicBool,
}

impl UserSignals {
    /// Both flags cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the orchestrator to stop. Stays set until [`reset`](Self::reset).
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Approve the update waiting in `ReadyToApply`.
    pub fn request_confirm(&self) {
        self.confirm.store(true, Ordering::SeqCst);
    }

    /// Whether a cancel was requested.
    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Whether a confirmation is pending, without consuming it.
    pub fn confirmed(&self) -> bool {
        self.confirm.load(Ordering::SeqCst)
    }

    /// Consume a pending confirmation.
    pub fn take_confirmed(&self) -> bool {
        self.confirm.swap(false, Ordering::SeqCst)
    }

    /// Clear both flags.
    pub fn reset(&self) {
        self.cancel.store(false, Ordering::SeqCst);
        self.confirm.store(false, Ordering::SeqCst);
    }
}
