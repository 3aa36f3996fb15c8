//! Runtime control through asynchronous signals.
//!
//! Handlers only flip atomic flags. The event loop reads them once per
//! iteration: the listing flag at the top of the loop, the running flag in
//! the loop condition. Handlers are installed without `SA_RESTART`, so a
//! signal arriving during the multiplexed wait interrupts it and the loop
//! gets to see the flag immediately.
//!
//! Outside the wait the loop thread keeps these signals blocked
//! ([`BlockedSignals`]); the wait unblocks them atomically, so one delivered
//! just before the wait starts still interrupts it.

use crate::error::Fatal;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// Flags mutated from signal context and polled by the event loop.
#[derive(Debug)]
pub struct RuntimeFlags {
    running: AtomicBool,
    listing: AtomicBool,
}

impl RuntimeFlags {
    pub const fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            listing: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the loop to finish its current iteration and shut down.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Ask for a stats dump before the next wait.
    pub fn request_listing(&self) {
        self.listing.store(true, Ordering::SeqCst);
    }

    /// Returns whether a dump was requested, clearing the request.
    pub fn take_listing_request(&self) -> bool {
        self.listing.swap(false, Ordering::SeqCst)
    }
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Signals whose handlers drive the event loop.
const HANDLED: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGUSR1];

/// Flags driven by the process signal handlers.
pub static FLAGS: RuntimeFlags = RuntimeFlags::new();

extern "C" fn on_terminate(_: libc::c_int) {
    FLAGS.stop();
}

extern "C" fn on_listing(_: libc::c_int) {
    FLAGS.request_listing();
}

/// Install handlers: SIGINT/SIGTERM stop, SIGUSR1 dumps stats, SIGPIPE is
/// ignored so a closed peer shows up as a write error instead.
pub fn install() -> Result<(), Fatal> {
    set_handler(libc::SIGINT, on_terminate as libc::sighandler_t)?;
    set_handler(libc::SIGTERM, on_terminate as libc::sighandler_t)?;
    set_handler(libc::SIGUSR1, on_listing as libc::sighandler_t)?;
    set_handler(libc::SIGPIPE, libc::SIG_IGN)?;
    Ok(())
}

fn set_handler(signal: libc::c_int, handler: libc::sighandler_t) -> Result<(), Fatal> {
    // SAFETY: the action is fully initialised before use and the handlers
    // only perform atomic stores, which are async-signal-safe.
    let ret = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signal, &action, std::ptr::null_mut())
    };

    if ret == -1 {
        return Err(Fatal::new("sigaction", io::Error::last_os_error()));
    }
    Ok(())
}

/// Signals blocked in the calling thread, with the mask to wait under.
///
/// The thread's previous mask is restored on drop.
pub struct BlockedSignals {
    previous: libc::sigset_t,
    wait_mask: libc::sigset_t,
}

impl BlockedSignals {
    /// Block the signals [`install`] handles.
    pub fn handled() -> Result<Self, Fatal> {
        Self::block(&HANDLED)
    }

    pub fn block(signals: &[libc::c_int]) -> Result<Self, Fatal> {
        // SAFETY: every set is initialised by sigemptyset or copied from one
        // filled in by pthread_sigmask before it is read.
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            for &signal in signals {
                libc::sigaddset(&mut set, signal);
            }

            let mut previous: libc::sigset_t = std::mem::zeroed();
            let ret = libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut previous);
            if ret != 0 {
                return Err(Fatal::new(
                    "pthread_sigmask",
                    io::Error::from_raw_os_error(ret),
                ));
            }

            let mut wait_mask = previous;
            for &signal in signals {
                libc::sigdelset(&mut wait_mask, signal);
            }
            Ok(Self {
                previous,
                wait_mask,
            })
        }
    }

    /// Mask to install for the duration of the wait: the previous one, with
    /// the blocked signals let through.
    pub fn wait_mask(&self) -> &libc::sigset_t {
        &self.wait_mask
    }
}

impl Drop for BlockedSignals {
    fn drop(&mut self) {
        // SAFETY: `previous` was filled in by pthread_sigmask.
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, std::ptr::null_mut());
        }
    }
}

/// Ask every process in our process group to terminate.
pub fn terminate_process_group() {
    // SAFETY: kill has no memory-safety preconditions.
    unsafe {
        libc::kill(0, libc::SIGTERM);
    }
}
