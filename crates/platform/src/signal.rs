//! Termination signal tracking.
//!
//! The daemons never act inside a signal handler. `signal-hook` stores the
//! signal number into an atomic and the reactor inspects it between turns,
//! so a SIGTERM received mid-response is honoured at the next wait boundary.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use signal_hook::SigId;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};

/// Signals that request an orderly daemon exit.
pub const TERMINATION_SIGNALS: [libc::c_int; 3] = [SIGINT, SIGTERM, SIGHUP];

/// Registered handlers for [`TERMINATION_SIGNALS`].
///
/// Handlers are unregistered when the value is dropped.
#[derive(Debug)]
pub struct ShutdownSignals {
    received: Arc<AtomicUsize>,
    ids: Vec<SigId>,
}

impl ShutdownSignals {
    /// Installs handlers for SIGINT, SIGTERM and SIGHUP.
    pub fn install() -> io::Result<Self> {
        let received = Arc::new(AtomicUsize::new(0));
        let mut ids = Vec::with_capacity(TERMINATION_SIGNALS.len());
        for signal in TERMINATION_SIGNALS {
            let id = signal_hook::flag::register_usize(
                signal,
                Arc::clone(&received),
                signal as usize,
            )?;
            ids.push(id);
        }
        Ok(Self { received, ids })
    }

    /// Number of the most recent termination signal, if any arrived.
    pub fn received(&self) -> Option<i32> {
        match self.received.load(Ordering::SeqCst) {
            0 => None,
            signal => i32::try_from(signal).ok(),
        }
    }
}

impl Drop for ShutdownSignals {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
