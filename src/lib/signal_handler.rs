//! Signal handling for interruption of a supervised run
//!
//! One handler is installed for the whole interruption set (SIGINT, SIGTERM,
//! SIGHUP, SIGQUIT). It only records the signal; the exit coordinator polls for
//! it at every blocking point and runs cleanup from wherever the run currently is.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::error::{Result, SupervisorError};

/// Signals treated as an external interrupt
pub const INTERRUPT_SIGNALS: [libc::c_int; 4] =
    [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT];

// First interrupt received (0 = none)
static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);
// Total interrupts received, including repeats
static SIGNAL_COUNT: AtomicU32 = AtomicU32::new(0);

/// Source of pending interrupts, polled by the coordinator
pub trait InterruptCheck {
    /// Signal number of the first pending interrupt, if any
    fn pending(&self) -> Option<i32>;

    /// How many interrupts arrived so far (a repeat escalates forwarding)
    fn count(&self) -> u32 {
        u32::from(self.pending().is_some())
    }
}

/// Interrupts delivered to this process by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSignals;

impl InterruptCheck for ProcessSignals {
    fn pending(&self) -> Option<i32> {
        match PENDING_SIGNAL.load(Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }

    fn count(&self) -> u32 {
        SIGNAL_COUNT.load(Ordering::SeqCst)
    }
}

/// Install the interrupt handler for every signal in [`INTERRUPT_SIGNALS`]
pub fn setup_signal_handlers() -> Result<ProcessSignals> {
    use std::sync::Once;
    static INIT: Once = Once::new();

    let mut result = Ok(());
    INIT.call_once(|| {
        for &sig in INTERRUPT_SIGNALS.iter() {
            // SAFETY: the action struct is fully initialised before use and the
            // handler only touches atomics.
            let installed = unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = signal_handler as extern "C" fn(libc::c_int) as usize;
                action.sa_flags = libc::SA_RESTART;
                libc::sigemptyset(&mut action.sa_mask);
                libc::sigaction(sig, &action, std::ptr::null_mut())
            };
            if installed != 0 {
                result = Err(SupervisorError::Internal(format!(
                    "Failed to install handler for signal {}: {}",
                    sig,
                    std::io::Error::last_os_error()
                )));
                return;
            }
        }
    });

    result.map(|()| ProcessSignals)
}

/// Async-safe signal handler: atomics only, no allocation, no locks, no I/O
extern "C" fn signal_handler(sig: libc::c_int) {
    let _ = PENDING_SIGNAL.compare_exchange(0, sig, Ordering::SeqCst, Ordering::SeqCst);
    SIGNAL_COUNT.fetch_add(1, Ordering::SeqCst);
}
