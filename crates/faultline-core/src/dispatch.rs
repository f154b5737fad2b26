//! # Synchronous fault dispatch
//!
//! Decides what happens to a fault delivered on the faulting thread:
//!
//! | Fault | Condition | Result |
//! |-------|-----------|--------|
//! | integer divide by zero | | reset FPU, throw `DivideError` |
//! | stack overflow | | flag guard reset, throw `StackOverflowError` (secondary stack) |
//! | access violation | address is the safepoint page | safepoint trap, resume in place |
//! | access violation | safe-restore marker set | unwind to the probe |
//! | access violation | write access | throw `ReadOnlyMemoryError` |
//! | anything else | | fatal report, exit |
//!
//! Records with non-zero flags (nested or non-continuable) are passed on to
//! the next handler untouched.
//!
//! The CRT `signal()` path is decided here as well, see
//! [`SignalSubsystem::handle_crt_signal`].

use crate::exception::ExceptionKind;
use crate::fault::{AccessKind, FaultCode, FaultRecord};
use crate::platform;
use crate::process::SignalSubsystem;
use crate::report::Termination;
use crate::runtime::RuntimeHooks;
use crate::safepoint::InterruptState;
use crate::signals::{self, CrtAction, FpeCode};
use crate::types::{RegisterContext, ThreadState};

/// Value of `EXCEPTION_CONTINUE_EXECUTION`.
pub const EXCEPTION_CONTINUE_EXECUTION: i32 = -1;

/// Value of `EXCEPTION_CONTINUE_SEARCH`.
pub const EXCEPTION_CONTINUE_SEARCH: i32 = 0;

/// What the exception filter tells the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition
{
    /// Resume the thread with the (possibly rewritten) context
    ContinueExecution,
    /// Not ours; let the next handler look at it
    ContinueSearch,
    /// Fatal; the filter must end the process this way
    Terminate(Termination),
}

impl Disposition
{
    /// Filter return code for the non-terminating dispositions.
    pub const fn filter_code(self) -> i32
    {
        match self {
            Disposition::ContinueExecution => EXCEPTION_CONTINUE_EXECUTION,
            Disposition::ContinueSearch | Disposition::Terminate(_) => EXCEPTION_CONTINUE_SEARCH,
        }
    }
}

/// Classification of a synchronous fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass
{
    /// Integer division by zero
    DivideByZero,
    /// Stack guard page hit
    StackOverflow,
    /// Poll of the protected safepoint page
    SafepointPoll,
    /// Access violation inside a guarded probe
    GuardedProbe,
    /// Write to read-only memory
    ReadOnlyWrite,
    /// Read or execute access violation outside any probe
    AccessViolation,
    /// Illegal instruction
    IllegalInstruction,
    /// Any other code
    Unclassified,
}

impl FaultClass
{
    /// Exception this class turns into, if any.
    pub const fn exception_kind(self) -> Option<ExceptionKind>
    {
        match self {
            FaultClass::DivideByZero => Some(ExceptionKind::DivideError),
            FaultClass::StackOverflow => Some(ExceptionKind::StackOverflow),
            FaultClass::ReadOnlyWrite => Some(ExceptionKind::ReadOnlyMemory),
            _ => None,
        }
    }

    /// Whether this class always ends in a fatal report.
    pub const fn is_fatal(self) -> bool
    {
        matches!(
            self,
            FaultClass::AccessViolation | FaultClass::IllegalInstruction | FaultClass::Unclassified
        )
    }
}

/// Classify `record` for `thread`.
///
/// The access-violation checks run in a fixed order: safepoint page, then
/// guarded probe, then write access.
pub fn classify(record: &FaultRecord, thread: &ThreadState, hooks: &dyn RuntimeHooks) -> FaultClass
{
    match record.code {
        FaultCode::INT_DIVIDE_BY_ZERO => FaultClass::DivideByZero,
        FaultCode::STACK_OVERFLOW => FaultClass::StackOverflow,
        FaultCode::ACCESS_VIOLATION => {
            let access = record.access;
            if access.map_or(false, |a| hooks.is_safepoint_address(a.address)) {
                FaultClass::SafepointPoll
            } else if thread.safe_restore().is_some() {
                FaultClass::GuardedProbe
            } else if access.and_then(|a| a.kind) == Some(AccessKind::Write) {
                FaultClass::ReadOnlyWrite
            } else {
                FaultClass::AccessViolation
            }
        }
        FaultCode::ILLEGAL_INSTRUCTION => FaultClass::IllegalInstruction,
        _ => FaultClass::Unclassified,
    }
}

impl SignalSubsystem
{
    /// Handle a structured exception raised on `thread`.
    ///
    /// # Safety
    ///
    /// `thread` must be the calling thread and `context` its saved registers
    /// at the fault; see [`SignalSubsystem::redirect`].
    pub unsafe fn handle_fault(
        &self,
        thread: &ThreadState,
        record: &FaultRecord,
        context: &mut dyn RegisterContext,
    ) -> Disposition
    {
        if record.flags != 0 {
            return Disposition::ContinueSearch;
        }

        let hooks = self.hooks();
        match classify(record, thread, hooks) {
            FaultClass::SafepointPoll => {
                // SAFETY: forwarded from the caller.
                return unsafe { self.safepoint_trap(thread, context) };
            }
            FaultClass::GuardedProbe => {
                // SAFETY: forwarded from the caller.
                return unsafe { self.redirect(thread, None, context) };
            }
            class => {
                let value = class.exception_kind().and_then(|kind| hooks.exceptions().get(kind));
                if let Some(value) = value {
                    match class {
                        FaultClass::DivideByZero => platform::reset_fpu(),
                        FaultClass::StackOverflow => thread.request_stack_guard_reset(),
                        _ => {}
                    }
                    // SAFETY: forwarded from the caller.
                    return unsafe { self.redirect(thread, Some(value), context) };
                }
            }
        }

        let termination = self.reporter().report(thread, record, &*context, hooks, self.sink());
        Disposition::Terminate(termination)
    }

    /// A thread touched the protected safepoint page.
    ///
    /// Wait for any collection, then, on the main thread only, either defer
    /// the pending interrupt or throw it. Always resumes in place unless an
    /// interrupt is thrown.
    unsafe fn safepoint_trap(&self, thread: &ThreadState, context: &mut dyn RegisterContext) -> Disposition
    {
        let hooks = self.hooks();
        hooks.wait_for_gc();

        if !thread.tid().is_main() {
            return Disposition::ContinueExecution;
        }

        if thread.is_deferring() {
            self.safepoint().defer();
        } else if let Some(value) = hooks.exceptions().interrupt {
            if self.consume_sigint() {
                self.safepoint().clear_force();
                self.safepoint().set_state(InterruptState::Delivered);
                // SAFETY: forwarded from the caller.
                return unsafe { self.redirect(thread, Some(value), context) };
            }
        }
        Disposition::ContinueExecution
    }

    /// Decide what the CRT `signal()` handler does with `signal`.
    ///
    /// `subcode` is the second handler argument, only meaningful for SIGFPE.
    /// `thread` is the calling thread's runtime state, if it has one.
    pub fn handle_crt_signal(&self, thread: Option<&ThreadState>, signal: i32, subcode: i32) -> CrtAction
    {
        match signal {
            signals::SIGFPE => {
                platform::reset_fpu();
                signals::fpe_action(FpeCode(subcode), &self.hooks().exceptions())
            }
            signals::SIGINT => {
                if self.safepoint().ignore_sigint() {
                    return CrtAction::Continue;
                }
                if self.safepoint().exit_on_sigint() {
                    return CrtAction::Exit(signals::interrupt_exit_status(signals::SIGINT));
                }
                thread
                    .and_then(|thread| self.try_throw_sigint(thread))
                    .map_or(CrtAction::Continue, CrtAction::Throw)
            }
            other => match thread.and_then(ThreadState::take_safe_restore) {
                Some(marker) => CrtAction::Restore(marker),
                None => CrtAction::Fatal(other),
            },
        }
    }
}
