//! # Win32 thread control
//!
//! [`Win32Thread`] owns a real handle to one thread of this process and
//! implements [`ThreadControl`] with `SuspendThread`, `GetThreadContext`,
//! `SetThreadContext` and `ResumeThread`.
//!
//! `GetCurrentThread()` returns a pseudo-handle that means "the caller" to
//! whoever uses it, so the handle is duplicated into a real one that other
//! threads (the profiler, the console handler) can use.

use std::ptr;

use winapi::um::handleapi::{CloseHandle, DuplicateHandle};
use winapi::um::processthreadsapi::{
    GetCurrentProcess, GetCurrentThread, GetThreadContext, ResumeThread, SetThreadContext, SetThreadPriority,
    SuspendThread,
};
use winapi::um::winbase::THREAD_PRIORITY_ABOVE_NORMAL;
use winapi::um::winnt::{DUPLICATE_SAME_ACCESS, HANDLE};

use super::context::control_integer_context;
use super::error::Win32Error;
use super::ffi::THREAD_COUNT_ERROR;
use crate::error::{FaultlineError, FaultlineResult};
use crate::platform::{ContextAccess, ThreadControl};
use crate::types::RegisterContext;

/// Owned handle to a thread of the current process
#[derive(Debug)]
pub struct Win32Thread
{
    handle: HANDLE,
}

// SAFETY: a real thread handle may be used from any thread of the process;
// `Win32Thread` never hands out the handle for closing.
unsafe impl Send for Win32Thread {}
// SAFETY: the thread APIs used on the handle are safe to call concurrently.
unsafe impl Sync for Win32Thread {}

impl Win32Thread
{
    /// Handle to the calling thread, usable from any thread.
    ///
    /// ## Errors
    ///
    /// - `Win32`: `DuplicateHandle` failed
    pub fn current() -> FaultlineResult<Self>
    {
        let mut handle: HANDLE = ptr::null_mut();
        // SAFETY: pseudo-handles for the current process and thread are always
        // valid, and `handle` is a valid out pointer.
        let ok = unsafe {
            let process = GetCurrentProcess();
            DuplicateHandle(
                process,
                GetCurrentThread(),
                process,
                &mut handle,
                0,
                0,
                DUPLICATE_SAME_ACCESS,
            )
        };
        if ok == 0 {
            return Err(Win32Error::last().into());
        }
        Ok(Self { handle })
    }

    /// Raw handle.
    pub fn handle(&self) -> HANDLE
    {
        self.handle
    }
}

impl ThreadControl for Win32Thread
{
    fn suspend(&self) -> FaultlineResult<()>
    {
        // SAFETY: `self.handle` is an open thread handle owned by `self`.
        if unsafe { SuspendThread(self.handle) } == THREAD_COUNT_ERROR {
            return Err(FaultlineError::SuspendFailed(Win32Error::last().to_string()));
        }
        Ok(())
    }

    fn resume(&self) -> FaultlineResult<()>
    {
        // SAFETY: as above.
        if unsafe { ResumeThread(self.handle) } == THREAD_COUNT_ERROR {
            return Err(FaultlineError::ResumeFailed(Win32Error::last().to_string()));
        }
        Ok(())
    }

    fn with_context(&self, access: ContextAccess, f: &mut dyn FnMut(&mut dyn RegisterContext))
        -> FaultlineResult<()>
    {
        let mut context = control_integer_context();
        // SAFETY: the handle is open and `context` is a properly aligned CONTEXT.
        if unsafe { GetThreadContext(self.handle, &mut context) } == 0 {
            return Err(FaultlineError::GetContextFailed(Win32Error::last().to_string()));
        }

        f(&mut context);

        if access == ContextAccess::ReadWrite {
            // SAFETY: as above; `context` still carries the flags it was read with.
            if unsafe { SetThreadContext(self.handle, &context) } == 0 {
                return Err(FaultlineError::SetContextFailed(Win32Error::last().to_string()));
            }
        }
        Ok(())
    }
}

impl Drop for Win32Thread
{
    fn drop(&mut self)
    {
        // SAFETY: the handle was created by `DuplicateHandle` and is closed once.
        unsafe { CloseHandle(self.handle) };
    }
}

/// Run the calling thread above normal priority.
///
/// Failure is ignored; the profiler still works, just with more jitter.
pub fn raise_current_thread_priority()
{
    // SAFETY: the pseudo-handle always refers to the calling thread.
    let _ = unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_ABOVE_NORMAL as i32) };
}
