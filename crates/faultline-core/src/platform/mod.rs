//! # Platform-Specific Implementations
//!
//! Thread control and handler installation for each backend.
//!
//! - **windows**: Structured exceptions, CRT signals, console control events,
//!   `SuspendThread`/`GetThreadContext`/`SetThreadContext`/`ResumeThread`
//!   - See: [Structured Exception Handling](https://learn.microsoft.com/en-us/windows/win32/debug/structured-exception-handling)
//! - **simulated**: An in-process register file with a real stack buffer.
//!   Used by the tests and the CLI on every host.
//!
//! Other operating systems deliver faults through POSIX signals, which need a
//! separate implementation and are not covered here.

pub mod guards;
pub mod simulated;

#[cfg(all(windows, any(target_arch = "x86_64", target_arch = "x86")))]
pub mod windows;

use crate::error::FaultlineResult;
use crate::types::RegisterContext;

/// How a thread's register context is accessed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextAccess
{
    /// Read only; changes made by the callback are discarded
    Read,
    /// Read, let the callback modify, then write back
    ReadWrite,
}

/// Suspend/inspect/resume one OS thread from another thread.
///
/// This is the three-step "signal delivery" protocol: a caller suspends the
/// target, reads or rewrites its context, then resumes it. Callers serialize
/// the whole sequence under the profiling lock.
///
/// Implementations must not allocate or log between `suspend` and `resume`:
/// the suspended thread may own the allocator or the log writer.
pub trait ThreadControl: Send + Sync
{
    /// Suspend the thread. Suspensions nest.
    fn suspend(&self) -> FaultlineResult<()>;

    /// Undo one suspension.
    fn resume(&self) -> FaultlineResult<()>;

    /// Run `f` on the thread's saved registers.
    ///
    /// With [`ContextAccess::ReadWrite`] the (possibly modified) context is
    /// written back after `f` returns. Only valid while suspended.
    fn with_context(&self, access: ContextAccess, f: &mut dyn FnMut(&mut dyn RegisterContext))
        -> FaultlineResult<()>;
}

/// Reset the floating-point unit after an arithmetic fault.
pub fn reset_fpu()
{
    #[cfg(all(windows, any(target_arch = "x86_64", target_arch = "x86")))]
    windows::ffi::fpreset();
}

/// Raise the priority of the calling thread (used by the profiler thread).
pub fn raise_current_thread_priority()
{
    #[cfg(all(windows, any(target_arch = "x86_64", target_arch = "x86")))]
    windows::threads::raise_current_thread_priority();
}
