//! # Handler installation and OS entry points
//!
//! The OS callbacks have fixed signatures and no user data pointer, so the
//! subsystem they serve is published once in a process-wide `OnceLock` by
//! [`install_default_signal_handlers`]. Everything behind the callbacks takes
//! the subsystem by reference.
//!
//! ## Entry points
//!
//! | Callback | Runs on | Decides with |
//! |----------|---------|--------------|
//! | `exception_filter` | faulting thread | [`SignalSubsystem::handle_fault`] |
//! | `crt_signal_handler` | faulting thread | [`SignalSubsystem::handle_crt_signal`] |
//! | `console_handler` | OS console thread | [`SignalSubsystem::handle_console_interrupt`] |
//!
//! The exception filter and the CRT handler never log through `tracing`;
//! installation and removal do.

use std::sync::{Arc, OnceLock};

use libc::c_int;
use winapi::shared::minwindef::{BOOL, DWORD};
use winapi::um::consoleapi::SetConsoleCtrlHandler;
use winapi::um::errhandlingapi::SetUnhandledExceptionFilter;
use winapi::um::winnt::{RtlCaptureContext, CONTEXT, EXCEPTION_POINTERS};

use super::context::control_integer_context;
use super::ffi;
use crate::dispatch::{Disposition, EXCEPTION_CONTINUE_SEARCH};
use crate::error::{FaultlineError, FaultlineResult};
use crate::fault::FaultRecord;
use crate::interrupt::{ConsoleEvent, InterruptOutcome};
use crate::process::{current_thread, SignalSubsystem};
use crate::report::Termination;
use crate::signals::{self, CrtAction, HANDLED_SIGNALS};
use crate::types::{Address, ThreadState};

static INSTALLED: OnceLock<Arc<SignalSubsystem>> = OnceLock::new();

fn installed() -> Option<&'static SignalSubsystem>
{
    INSTALLED.get().map(|subsystem| &**subsystem)
}

/// Install the CRT signal handlers and the unhandled-exception filter.
///
/// Must run once at startup, before any runtime thread can fault. Calling it
/// again with the same subsystem is a no-op.
///
/// ## Errors
///
/// - `InstallFailed`: a CRT `signal()` call failed, or handlers were already
///   installed for a different subsystem
pub fn install_default_signal_handlers(subsystem: Arc<SignalSubsystem>) -> FaultlineResult<()>
{
    let current = INSTALLED.get_or_init(|| Arc::clone(&subsystem));
    if !Arc::ptr_eq(current, &subsystem) {
        return Err(FaultlineError::InstallFailed(
            "signal handlers (already installed for another subsystem)".into(),
        ));
    }

    for sig in HANDLED_SIGNALS {
        arm_crt_handler(sig)?;
    }

    // SAFETY: `exception_filter` matches `LPTOP_LEVEL_EXCEPTION_FILTER`.
    unsafe { SetUnhandledExceptionFilter(Some(exception_filter)) };
    tracing::info!("installed default signal handlers");
    Ok(())
}

/// Install the console control handler that turns Ctrl-C into an interrupt.
///
/// ## Errors
///
/// - `InstallFailed`: `SetConsoleCtrlHandler` failed
pub fn install_sigint_handler() -> FaultlineResult<()>
{
    // SAFETY: `console_handler` matches `PHANDLER_ROUTINE`.
    if unsafe { SetConsoleCtrlHandler(Some(console_handler), 1) } == 0 {
        return Err(FaultlineError::InstallFailed("console control handler".into()));
    }
    tracing::debug!("installed console control handler");
    Ok(())
}

/// Give Ctrl-C back its default console processing.
pub fn restore_signals()
{
    // SAFETY: a null routine with `FALSE` only toggles the process's Ctrl-C flag.
    unsafe { SetConsoleCtrlHandler(None, 0) };
    tracing::debug!("restored default console Ctrl-C processing");
}

/// Re-arm the stack guard page if `thread` recovered from a stack overflow.
///
/// Call after the `StackOverflowError` thrown on `thread` has been caught and
/// the stack has unwound.
pub fn reset_stack_guard_if_needed(thread: &ThreadState)
{
    if thread.take_stack_guard_reset() && !ffi::reset_stack_overflow() {
        tracing::warn!(tid = %thread.tid(), "failed to restore the stack guard page");
    }
}

fn arm_crt_handler(sig: c_int) -> FaultlineResult<()>
{
    let handler = crt_signal_handler as extern "C" fn(c_int, c_int);
    // SAFETY: the CRT calls SIGFPE handlers with a second sub-code argument
    // and ignores it for the others; the extra argument is harmless in cdecl.
    let previous = unsafe { libc::signal(sig, handler as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        return Err(FaultlineError::InstallFailed(signals::signal_name(sig).into()));
    }
    Ok(())
}

unsafe extern "system" fn exception_filter(info: *mut EXCEPTION_POINTERS) -> i32
{
    let (Some(subsystem), Some(thread)) = (installed(), current_thread()) else {
        return EXCEPTION_CONTINUE_SEARCH;
    };

    // SAFETY: the OS passes valid exception and context records that live
    // for the duration of the filter.
    let (record, context) = unsafe {
        let info = &*info;
        (&*info.ExceptionRecord, &mut *info.ContextRecord)
    };

    let parameters = (record.NumberParameters as usize).min(record.ExceptionInformation.len());
    let fault = FaultRecord::from_parts(
        record.ExceptionCode,
        record.ExceptionFlags,
        Address::from(record.ExceptionAddress as usize),
        &record.ExceptionInformation[..parameters],
    );

    // SAFETY: `context` is this thread's own record at the fault.
    let disposition = unsafe { subsystem.handle_fault(&thread, &fault, context) };
    match disposition {
        Disposition::Terminate(termination) => terminate(subsystem, termination),
        other => other.filter_code(),
    }
}

fn terminate(subsystem: &SignalSubsystem, termination: Termination) -> !
{
    match termination {
        Termination::Exit(status) => subsystem.hooks().exit(status),
        // SAFETY: `_exit` ends the process without running atexit handlers
        // or touching any state the faulting report may have left locked.
        Termination::HardExit(status) => unsafe { libc::_exit(status) },
    }
}

extern "C" fn crt_signal_handler(sig: c_int, subcode: c_int)
{
    let Some(subsystem) = installed() else {
        return;
    };
    if sig == signals::SIGFPE || sig == signals::SIGINT {
        // The CRT resets the disposition before calling us.
        let _ = arm_crt_handler(sig);
    }

    let thread = current_thread();
    let hooks = subsystem.hooks();
    let action = subsystem.handle_crt_signal(thread.as_deref(), sig, subcode);
    match action {
        CrtAction::Continue => {}
        CrtAction::Throw(value) => {
            drop(thread);
            hooks.throw(value)
        }
        CrtAction::InternalError(code) => {
            drop(thread);
            hooks.internal_error(format_args!("Unexpected FPE Error 0x{:X}", code.0))
        }
        CrtAction::Exit(status) => hooks.exit(status),
        CrtAction::Restore(marker) => {
            drop(thread);
            hooks.unwind_to_safe_restore(marker)
        }
        CrtAction::Fatal(sig) => {
            let mut context: CONTEXT = control_integer_context();
            // SAFETY: `context` is a properly aligned CONTEXT for the calling thread.
            unsafe { RtlCaptureContext(&mut context) };
            let skipped = subsystem
                .reporter()
                .report_signal(thread.as_deref(), sig, &context, hooks, subsystem.sink());
            if let Some(termination) = skipped {
                terminate(subsystem, termination);
            }
            // SAFETY: the handler for `sig` was reset to the default by the CRT.
            unsafe { libc::raise(sig) };
        }
    }
}

unsafe extern "system" fn console_handler(ctrl_type: DWORD) -> BOOL
{
    let Some(subsystem) = installed() else {
        return 0;
    };
    if let InterruptOutcome::Exit(status) = subsystem.handle_console_interrupt(ConsoleEvent::from_raw(ctrl_type)) {
        subsystem.hooks().exit(status);
    }
    1
}
