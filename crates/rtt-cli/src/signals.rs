//! Signal handling for graceful shutdown.
//!
//! SIGINT and SIGTERM set a process-wide flag that the cyclic loop polls
//! once per cycle. The worker blocks both signals so they are delivered
//! to the controlling thread instead of cutting its absolute sleep short.

use nix::sys::signal::{
    pthread_sigmask, sigaction, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use tracing::debug;

/// Set once a shutdown signal arrives; read by the worker every cycle.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
/// Count of signals received (for diagnostics).
static SIGNAL_COUNT: AtomicU32 = AtomicU32::new(0);
/// The most recent signal number received.
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Signal types that end a measurement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
}

impl SignalKind {
    fn from_raw(signum: i32) -> Option<Self> {
        match signum {
            libc::SIGTERM => Some(Self::Terminate),
            libc::SIGINT => Some(Self::Interrupt),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

extern "C" fn handle_shutdown(signum: libc::c_int) {
    // Only async-signal-safe operations here: atomics.
    SIGNAL_COUNT.fetch_add(1, Ordering::Relaxed);
    LAST_SIGNAL.store(signum, Ordering::Relaxed);
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// Handle to the installed shutdown handlers.
#[derive(Debug, Clone, Copy)]
pub struct SignalHandler {
    _installed: (),
}

impl SignalHandler {
    /// Register handlers for SIGINT and SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if `sigaction` rejects a handler.
    pub fn install() -> std::io::Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(handle_shutdown),
            SaFlags::empty(),
            SigSet::empty(),
        );

        for signal in [Signal::SIGINT, Signal::SIGTERM] {
            // SAFETY: the handler only touches atomics, which is async-signal-safe.
            unsafe { sigaction(signal, &action) }.map_err(std::io::Error::from)?;
        }

        debug!("Unix signal handlers registered");
        Ok(Self { _installed: () })
    }

    /// Flag the worker polls; lives for the whole process.
    #[must_use]
    pub fn shutdown_flag(&self) -> &'static AtomicBool {
        &SHUTDOWN_REQUESTED
    }

    /// Check if shutdown has been requested.
    #[inline]
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
    }

    /// Total number of signals received.
    #[must_use]
    pub fn signal_count(&self) -> u32 {
        SIGNAL_COUNT.load(Ordering::Relaxed)
    }

    /// The most recent shutdown signal, if any arrived.
    #[must_use]
    pub fn last_signal(&self) -> Option<SignalKind> {
        SignalKind::from_raw(LAST_SIGNAL.load(Ordering::Relaxed))
    }
}

/// Block the shutdown signals in the calling thread.
///
/// # Errors
///
/// Returns an error if the signal mask cannot be changed.
pub fn block_shutdown_signals() -> std::io::Result<()> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), None).map_err(std::io::Error::from)
}
