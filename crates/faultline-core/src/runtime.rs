//! # Runtime hooks
//!
//! Services this crate consumes from the managed runtime it is embedded in.
//!
//! The signal subsystem does not build exception objects, walk stacks,
//! run the garbage collector or own the event loop. It reaches those through
//! [`RuntimeHooks`], which the runtime implements once and hands to
//! [`crate::SignalSubsystem`] at startup.
//!
//! ## Calling context
//!
//! Most hooks are called from a fault handler or from a thread that holds the
//! main thread suspended. Implementations must not allocate, take locks that
//! the faulting thread may hold, or produce garbage-collected objects in:
//!
//! - [`RuntimeHooks::record_backtrace`]
//! - [`RuntimeHooks::is_safepoint_address`]
//! - [`RuntimeHooks::symbolize`]
//! - [`RuntimeHooks::show_illegal_instruction`]
//!
//! The diverging hooks ([`RuntimeHooks::throw`],
//! [`RuntimeHooks::internal_error`], [`RuntimeHooks::unwind_to_safe_restore`])
//! run on the faulting thread in ordinary thread context, after the CRT signal
//! handler decided to throw.

use std::fmt;

use crate::exception::{ExceptionTable, ExceptionValue};
use crate::types::{Address, RegisterContext};

/// Services provided by the embedding runtime
pub trait RuntimeHooks: Send + Sync
{
    /// Current exception singletons.
    fn exceptions(&self) -> ExceptionTable;

    /// Entry point that a redirected thread resumes at.
    ///
    /// The trampoline takes the thread's pending transfer
    /// ([`crate::types::ThreadState::take_pending`]) and throws it.
    fn throw_trampoline(&self) -> Address;

    /// Walk the stack described by `context` into `buffer`, returning the
    /// number of words written.
    fn record_backtrace(&self, context: &dyn RegisterContext, buffer: &mut [usize]) -> usize;

    /// Whether `address` lies on the page the runtime protects to stop
    /// threads at safepoints.
    fn is_safepoint_address(&self, address: Address) -> bool;

    /// Park at a safepoint until a pending collection finishes.
    fn wait_for_gc(&self) {}

    /// Wake the event loop so a thread blocked in I/O notices a pending interrupt.
    fn wake_event_loop(&self) {}

    /// Make the next safepoint poll on the main thread trap.
    fn arm_safepoint(&self) {}

    /// Undo [`RuntimeHooks::arm_safepoint`] once the interrupt is consumed.
    fn disarm_safepoint(&self) {}

    /// Best-effort description of the code at `pc` for fatal reports.
    fn symbolize(&self, pc: Address, out: &mut dyn fmt::Write) -> fmt::Result
    {
        write!(out, "unknown function (ip: 0x{pc:x})")
    }

    /// Describe the instruction at the context's instruction pointer.
    fn show_illegal_instruction(&self, context: &dyn RegisterContext, out: &mut dyn fmt::Write) -> fmt::Result
    {
        writeln!(out, "Invalid instruction at 0x{:x}", context.instruction_pointer())
    }

    /// Print the runtime's own crash report (task backtraces and so on).
    fn critical_error(&self, _signal: i32, _context: &dyn RegisterContext) {}

    /// Throw `value` on the current thread.
    fn throw(&self, value: ExceptionValue) -> !;

    /// Throw the runtime's generic internal error with `message`.
    fn internal_error(&self, message: fmt::Arguments<'_>) -> !;

    /// Unwind to the guarded probe identified by `marker`.
    fn unwind_to_safe_restore(&self, marker: usize) -> !;

    /// Orderly process exit with `status`.
    fn exit(&self, status: i32) -> !
    {
        std::process::exit(status)
    }

    /// Immediate abnormal termination.
    fn abort(&self) -> !
    {
        std::process::abort()
    }
}
