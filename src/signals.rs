//! Signal flags for cancellation and progress logging (spec §5
//! "Cancellation and timeouts", §6 "Signals").
//!
//! `SIGINT` sets a sticky flag consulted at every trie descent
//! ([`crate::engine::executor::execute_rules`] threads it through to
//! [`crate::engine::dispatch`]); `SIGUSR1` sets a separate flag the loader
//! would consult to emit a progress line. Grounded on the async-signal-safe
//! `signal_hook::flag::register` idiom (an `AtomicBool` set from the signal
//! handler, polled from ordinary code) rather than running work inside the
//! handler itself.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGUSR1};

/// The two sticky flags a run consults: `interrupted` (SIGINT) and
/// `progress_requested` (SIGUSR1).
pub struct SignalFlags {
    pub interrupted: Arc<AtomicBool>,
    pub progress_requested: Arc<AtomicBool>,
}

impl SignalFlags {
    /// Registers both signal handlers. Returns `Err` if the underlying
    /// `sigaction` call fails (platform without signal support, or the
    /// slot already taken by another registration).
    pub fn install() -> Result<Self, std::io::Error> {
        let interrupted = Arc::new(AtomicBool::new(false));
        let progress_requested = Arc::new(AtomicBool::new(false));

        signal_hook::flag::register(SIGINT, Arc::clone(&interrupted))?;
        signal_hook::flag::register(SIGUSR1, Arc::clone(&progress_requested))?;

        Ok(SignalFlags { interrupted, progress_requested })
    }

    /// Consumes a pending SIGUSR1 request, returning whether one was set.
    pub fn take_progress_request(&self) -> bool {
        self.progress_requested.swap(false, std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn take_progress_request_clears_flag() {
        let flags =
            SignalFlags { interrupted: Arc::new(AtomicBool::new(false)), progress_requested: Arc::new(AtomicBool::new(true)) };
        assert!(flags.take_progress_request());
        assert!(!flags.progress_requested.load(Ordering::SeqCst));
        assert!(!flags.take_progress_request());
    }
}
