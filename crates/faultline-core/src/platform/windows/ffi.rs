//! # C Runtime FFI Declarations
//!
//! CRT helpers that neither `winapi` nor `libc` declare, plus the
//! `CONTEXT` flag combination the backend requests.
//!
//! ## Safety Notes
//!
//! `_fpreset` and `_resetstkoflw` operate on the calling thread only. They are
//! wrapped in safe functions below; callers just need to be on the thread
//! whose state should be reset.

use winapi::um::winnt::{CONTEXT_CONTROL, CONTEXT_INTEGER};

/// `CONTEXT_CONTROL | CONTEXT_INTEGER` for the native architecture.
pub const CONTEXT_CONTROL_INTEGER: u32 = CONTEXT_CONTROL | CONTEXT_INTEGER;

/// Returned by `SuspendThread` and `ResumeThread` on failure.
pub const THREAD_COUNT_ERROR: u32 = u32::MAX;

extern "C" {
    /// Reinitialize the floating-point package.
    fn _fpreset();

    /// Re-arm the stack guard page after a stack overflow was handled.
    ///
    /// Returns non-zero on success.
    fn _resetstkoflw() -> libc::c_int;
}

/// Reset the floating-point unit of the calling thread.
pub fn fpreset()
{
    // SAFETY: `_fpreset` has no arguments and only touches the calling thread's FPU state.
    unsafe { _fpreset() };
}

/// Restore the calling thread's stack guard page.
///
/// Must run after the thread has unwound out of the overflowed region.
/// Returns `false` if the CRT could not restore it.
pub fn reset_stack_overflow() -> bool
{
    // SAFETY: `_resetstkoflw` only inspects and re-protects the calling thread's stack.
    unsafe { _resetstkoflw() != 0 }
}
