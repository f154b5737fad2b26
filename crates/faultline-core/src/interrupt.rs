//! # Interrupt delivery
//!
//! Console interrupts (Ctrl-C) arrive on a thread the OS creates for the
//! console control handler, never on the thread that should see them. They
//! are delivered to the main thread in one of three ways:
//!
//! 1. **From outside**: [`SignalSubsystem::deliver_sigint`] suspends the main
//!    thread, rewrites its context to throw the interrupt exception, and
//!    resumes it. This only happens when the thread is blocked in I/O and not
//!    deferring, or when a repeated interrupt forced delivery.
//! 2. **At a safepoint**: otherwise the request stays pending, the safepoint
//!    page is armed, and the main thread throws it at its next poll
//!    ([`SignalSubsystem::poll_interrupt`] or the safepoint trap).
//! 3. **In-thread**: when the CRT routes SIGINT to the main thread itself,
//!    [`SignalSubsystem::try_throw_sigint`] decides directly.
//!
//! ## Suspend protocol
//!
//! The suspend, context rewrite and resume run as one sequence under the
//! profiling lock, so delivery never races the profiler's own suspension of
//! the same thread. Nothing between suspend and resume allocates or logs.

use crate::exception::{ExceptionValue, PendingTransfer};
use crate::error::FaultlineError;
use crate::platform::guards::ThreadSuspendGuard;
use crate::platform::ContextAccess;
use crate::process::{MainThread, SignalSubsystem};
use crate::safepoint::InterruptState;
use crate::signals::{self, interrupt_exit_status};
use crate::types::ThreadState;

/// Console control event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleEvent
{
    /// `CTRL_C_EVENT`
    CtrlC,
    /// `CTRL_BREAK_EVENT`
    CtrlBreak,
    /// `CTRL_CLOSE_EVENT`
    Close,
    /// `CTRL_LOGOFF_EVENT`
    Logoff,
    /// `CTRL_SHUTDOWN_EVENT`
    Shutdown,
    /// Anything newer
    Other(u32),
}

impl ConsoleEvent
{
    /// Decode the handler routine's argument.
    pub const fn from_raw(raw: u32) -> Self
    {
        match raw {
            0 => ConsoleEvent::CtrlC,
            1 => ConsoleEvent::CtrlBreak,
            2 => ConsoleEvent::Close,
            5 => ConsoleEvent::Logoff,
            6 => ConsoleEvent::Shutdown,
            other => ConsoleEvent::Other(other),
        }
    }

    /// CRT signal the event stands for: Ctrl-C is SIGINT, everything else SIGTERM.
    pub const fn signal(self) -> i32
    {
        match self {
            ConsoleEvent::CtrlC => signals::SIGINT,
            _ => signals::SIGTERM,
        }
    }
}

/// Result of one console interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome
{
    /// Interrupts are configured to be ignored
    Ignored,
    /// Dropped inside the quiet window after a forced delivery
    Suppressed,
    /// The process must exit with this status
    Exit(i32),
    /// Pending; the main thread throws it at its next safepoint
    Pending,
    /// Pending; the main thread is deferring interrupts
    Deferred,
    /// Thrown into the blocked main thread
    Delivered,
    /// Thrown into the main thread despite deferral
    Forced,
    /// An OS primitive failed; the request is left pending
    Failed,
}

impl SignalSubsystem
{
    /// Mark an interrupt pending and arm the safepoint page.
    ///
    /// Returns `true` if one was already pending (which raises force).
    pub fn request_sigint(&self) -> bool
    {
        let already = self.safepoint().request();
        self.hooks().arm_safepoint();
        already
    }

    /// Take the pending interrupt and disarm the safepoint page.
    pub fn consume_sigint(&self) -> bool
    {
        let had = self.safepoint().consume();
        if had {
            self.hooks().disarm_safepoint();
        }
        had
    }

    /// Entry point of the console control handler.
    pub fn handle_console_interrupt(&self, event: ConsoleEvent) -> InterruptOutcome
    {
        if self.safepoint().ignore_sigint() {
            return InterruptOutcome::Ignored;
        }
        if self.safepoint().exit_on_sigint() {
            return InterruptOutcome::Exit(interrupt_exit_status(event.signal()));
        }
        let outcome = self.deliver_sigint();
        tracing::debug!(?event, ?outcome, "console interrupt");
        outcome
    }

    /// Try to throw an interrupt into the main thread from another thread.
    ///
    /// Without a registered main thread the request is only recorded.
    pub fn deliver_sigint(&self) -> InterruptOutcome
    {
        if self.safepoint().in_quiet_window() {
            return InterruptOutcome::Suppressed;
        }
        let Some(main) = self.main_thread() else {
            self.request_sigint();
            return InterruptOutcome::Pending;
        };

        let _profile = self.lock_profile();
        self.request_sigint();
        self.hooks().wake_event_loop();

        let Ok(guard) = ThreadSuspendGuard::new(&*main.control) else {
            self.sink().write_str("error: SuspendThread failed\n");
            return InterruptOutcome::Failed;
        };

        let outcome = self.deliver_to_suspended(main);

        if guard.resume().is_err() {
            self.sink().write_str("error: ResumeThread failed\n");
            self.hooks().abort();
        }
        outcome
    }

    fn deliver_to_suspended(&self, main: &MainThread) -> InterruptOutcome
    {
        let state = &*main.state;
        let force = self.safepoint().check_force();
        if !force && (state.is_deferring() || !state.is_io_wait()) {
            if state.is_deferring() {
                self.safepoint().defer();
                return InterruptOutcome::Deferred;
            }
            return InterruptOutcome::Pending;
        }

        let Some(value) = self.hooks().exceptions().interrupt else {
            return InterruptOutcome::Pending;
        };

        self.consume_sigint();
        if force {
            self.sink().write_str("WARNING: Force throwing a SIGINT\n");
            self.safepoint().start_quiet_window(self.config().force_quiet_period);
        }
        self.safepoint().clear_force();

        // SAFETY: `main.control` holds the thread suspended and hands us its
        // own saved context.
        let result = main.control.with_context(ContextAccess::ReadWrite, &mut |ctx| unsafe {
            self.redirect(state, Some(value), ctx);
        });

        match result {
            Ok(()) => {
                let delivered = if force { InterruptState::Forced } else { InterruptState::Delivered };
                self.safepoint().set_state(delivered);
                if force {
                    InterruptOutcome::Forced
                } else {
                    InterruptOutcome::Delivered
                }
            }
            Err(err) => {
                self.sink().write_str(match err {
                    FaultlineError::SetContextFailed(_) => "error: SetThreadContext failed\n",
                    _ => "error: GetThreadContext failed\n",
                });
                // The thread never saw the rewrite; undo and keep the interrupt.
                if let Some(PendingTransfer::Restore(marker)) = state.take_pending() {
                    state.set_safe_restore(marker);
                }
                self.request_sigint();
                InterruptOutcome::Failed
            }
        }
    }

    /// In-thread variant: the CRT delivered SIGINT to `thread` itself.
    ///
    /// Returns the exception to throw right now, or `None` if the interrupt
    /// stays pending for a later safepoint.
    pub fn try_throw_sigint(&self, thread: &ThreadState) -> Option<ExceptionValue>
    {
        if self.safepoint().in_quiet_window() {
            return None;
        }
        self.request_sigint();
        self.hooks().wake_event_loop();

        let force = self.safepoint().check_force();
        if !(force || (!thread.is_deferring() && thread.is_io_wait())) {
            if thread.is_deferring() {
                self.safepoint().defer();
            }
            return None;
        }

        let value = self.hooks().exceptions().interrupt?;
        self.consume_sigint();
        if force {
            self.sink().write_str("WARNING: Force throwing a SIGINT\n");
            self.safepoint().start_quiet_window(self.config().force_quiet_period);
        }
        self.safepoint().clear_force();
        self.safepoint().set_state(if force { InterruptState::Forced } else { InterruptState::Delivered });
        Some(value)
    }

    /// Cooperative safepoint check, called by `thread` during normal execution.
    ///
    /// Returns the interrupt exception if one is pending and the thread is
    /// the main thread and not deferring.
    pub fn poll_interrupt(&self, thread: &ThreadState) -> Option<ExceptionValue>
    {
        if !thread.tid().is_main() || !self.safepoint().is_pending() {
            return None;
        }
        if thread.is_deferring() {
            self.safepoint().defer();
            return None;
        }
        let value = self.hooks().exceptions().interrupt?;
        if !self.consume_sigint() {
            return None;
        }
        self.safepoint().clear_force();
        self.safepoint().set_state(InterruptState::Delivered);
        Some(value)
    }
}
