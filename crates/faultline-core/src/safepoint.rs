//! # Safepoint interrupt state
//!
//! Process-wide flags shared by the console-interrupt callback, the fault
//! handler for safepoint traps and every thread's cooperative safepoint check.
//!
//! ## State machine
//!
//! ```text
//!              request                 deliverable
//!   Idle ─────────────────▶ Requested ─────────────▶ Delivered
//!                              │  ▲
//!            thread defers     │  │ request while pending (sets force)
//!                              ▼  │
//!                           Deferred ──────────────▶ Forced
//!                                     force set
//! ```
//!
//! A request that cannot be delivered stays pending and is picked up by the
//! main thread's next safepoint check. A second request while one is pending
//! sets the force flag, which makes the next delivery attempt ignore
//! deferral. After a forced delivery, requests are dropped for a short quiet
//! window so a burst of key presses yields one forced throw.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Where the most recent interrupt request ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterruptState
{
    /// No interrupt pending
    Idle = 0,
    /// Pending, waiting for the main thread to reach a safepoint
    Requested = 1,
    /// Pending, main thread is deferring interrupts
    Deferred = 2,
    /// Thrown into the main thread
    Delivered = 3,
    /// Thrown into the main thread despite deferral
    Forced = 4,
}

impl InterruptState
{
    const fn from_raw(raw: u8) -> Self
    {
        match raw {
            1 => InterruptState::Requested,
            2 => InterruptState::Deferred,
            3 => InterruptState::Delivered,
            4 => InterruptState::Forced,
            _ => InterruptState::Idle,
        }
    }
}

/// Interrupt flags for the whole process
#[derive(Debug)]
pub struct SafepointState
{
    pending: AtomicBool,
    deferred: AtomicBool,
    force: AtomicBool,
    exit_on_sigint: AtomicBool,
    ignore_sigint: AtomicBool,
    state: AtomicU8,
    epoch: Instant,
    quiet_until_ns: AtomicU64,
}

impl SafepointState
{
    /// Fresh state with no interrupt pending.
    pub fn new(exit_on_sigint: bool, ignore_sigint: bool) -> Self
    {
        Self {
            pending: AtomicBool::new(false),
            deferred: AtomicBool::new(false),
            force: AtomicBool::new(false),
            exit_on_sigint: AtomicBool::new(exit_on_sigint),
            ignore_sigint: AtomicBool::new(ignore_sigint),
            state: AtomicU8::new(InterruptState::Idle as u8),
            epoch: Instant::now(),
            quiet_until_ns: AtomicU64::new(0),
        }
    }

    /// Mark an interrupt pending.
    ///
    /// Returns `true` if one was already pending, in which case the force
    /// flag is raised.
    pub fn request(&self) -> bool
    {
        let already = self.pending.swap(true, Ordering::SeqCst);
        if already {
            self.force.store(true, Ordering::SeqCst);
        } else {
            self.set_state(InterruptState::Requested);
        }
        already
    }

    /// Take the pending interrupt, returning whether there was one.
    pub fn consume(&self) -> bool
    {
        let had = self.pending.swap(false, Ordering::SeqCst);
        if had {
            self.deferred.store(false, Ordering::SeqCst);
        }
        had
    }

    /// Leave the pending interrupt for a later safepoint check.
    pub fn defer(&self)
    {
        if self.pending.load(Ordering::SeqCst) {
            self.deferred.store(true, Ordering::SeqCst);
            self.set_state(InterruptState::Deferred);
        }
    }

    /// Whether an interrupt is pending.
    pub fn is_pending(&self) -> bool
    {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether the pending interrupt has been deferred at least once.
    pub fn is_deferred(&self) -> bool
    {
        self.deferred.load(Ordering::SeqCst)
    }

    /// Whether the next delivery must ignore deferral.
    pub fn check_force(&self) -> bool
    {
        self.force.load(Ordering::SeqCst)
    }

    /// Clear the force flag after a delivery.
    pub fn clear_force(&self)
    {
        self.force.store(false, Ordering::SeqCst);
    }

    /// Console interrupts terminate the process instead of being delivered.
    pub fn exit_on_sigint(&self) -> bool
    {
        self.exit_on_sigint.load(Ordering::SeqCst)
    }

    pub fn set_exit_on_sigint(&self, exit: bool)
    {
        self.exit_on_sigint.store(exit, Ordering::SeqCst);
    }

    /// Console interrupts are dropped.
    pub fn ignore_sigint(&self) -> bool
    {
        self.ignore_sigint.load(Ordering::SeqCst)
    }

    pub fn set_ignore_sigint(&self, ignore: bool)
    {
        self.ignore_sigint.store(ignore, Ordering::SeqCst);
    }

    /// Outcome of the most recent request.
    pub fn state(&self) -> InterruptState
    {
        InterruptState::from_raw(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: InterruptState)
    {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Drop requests for `period` from now.
    pub(crate) fn start_quiet_window(&self, period: Duration)
    {
        let until = self.now_ns().saturating_add(period.as_nanos() as u64);
        self.quiet_until_ns.store(until, Ordering::SeqCst);
    }

    /// Whether we are inside the quiet window that follows a forced delivery.
    pub fn in_quiet_window(&self) -> bool
    {
        self.now_ns() < self.quiet_until_ns.load(Ordering::SeqCst)
    }

    fn now_ns(&self) -> u64
    {
        // Offset by one so that a zero deadline is never in the future.
        self.epoch.elapsed().as_nanos() as u64 + 1
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_second_request_sets_force()
    {
        let state = SafepointState::new(false, false);
        assert!(!state.request());
        assert!(!state.check_force());
        assert!(state.request());
        assert!(state.check_force());
    }

    #[test]
    fn test_consume_takes_pending_once()
    {
        let state = SafepointState::new(false, false);
        state.request();
        state.defer();
        assert!(state.is_deferred());
        assert!(state.consume());
        assert!(!state.is_deferred());
        assert!(!state.consume());
    }

    #[test]
    fn test_defer_without_pending_is_noop()
    {
        let state = SafepointState::new(false, false);
        state.defer();
        assert!(!state.is_deferred());
        assert_eq!(state.state(), InterruptState::Idle);
    }

    #[test]
    fn test_quiet_window_expires()
    {
        let state = SafepointState::new(false, false);
        assert!(!state.in_quiet_window());
        state.start_quiet_window(Duration::from_secs(60));
        assert!(state.in_quiet_window());
        state.start_quiet_window(Duration::ZERO);
        assert!(!state.in_quiet_window());
    }
}
