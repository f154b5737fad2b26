//! # RAII Guards for thread suspension
//!
//! [`ThreadSuspendGuard`] suspends a thread and resumes it when dropped, so an
//! early return or a panic between suspend and resume cannot leave the target
//! frozen.
//!
//! The interrupt and profiling paths resume explicitly with
//! [`ThreadSuspendGuard::resume`] so that they can treat a failed resume as
//! fatal; the drop path is the best-effort fallback for unwinding.
//!
//! ## Example
//!
//! ```rust
//! use faultline_core::platform::guards::ThreadSuspendGuard;
//! use faultline_core::platform::simulated::SimulatedThread;
//!
//! let thread = SimulatedThread::new();
//! let guard = ThreadSuspendGuard::new(&thread)?;
//! assert!(thread.is_suspended());
//! guard.resume()?;
//! assert!(!thread.is_suspended());
//! # Ok::<(), faultline_core::error::FaultlineError>(())
//! ```

use crate::error::FaultlineResult;
use crate::platform::ThreadControl;

/// RAII guard that suspends a thread and resumes it when dropped.
pub struct ThreadSuspendGuard<'a>
{
    thread: &'a dyn ThreadControl,
    active: bool,
}

impl<'a> ThreadSuspendGuard<'a>
{
    /// Suspend `thread`.
    ///
    /// ## Errors
    ///
    /// - `SuspendFailed`: the thread could not be suspended; it keeps running
    pub fn new(thread: &'a dyn ThreadControl) -> FaultlineResult<Self>
    {
        thread.suspend()?;
        Ok(Self { thread, active: true })
    }

    /// The suspended thread.
    pub fn thread(&self) -> &'a dyn ThreadControl
    {
        self.thread
    }

    /// Resume the thread now. After this, dropping the guard is a no-op.
    ///
    /// ## Errors
    ///
    /// - `ResumeFailed`: the thread is still suspended
    pub fn resume(mut self) -> FaultlineResult<()>
    {
        if self.active {
            self.active = false;
            self.thread.resume()?;
        }
        Ok(())
    }
}

impl Drop for ThreadSuspendGuard<'_>
{
    fn drop(&mut self)
    {
        if self.active {
            // Best effort resume - ignore errors
            let _ = self.thread.resume();
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::platform::simulated::SimulatedThread;

    #[test]
    fn test_drop_resumes_thread()
    {
        let thread = SimulatedThread::new();
        {
            let _guard = ThreadSuspendGuard::new(&thread).unwrap();
            assert!(thread.is_suspended());
        }
        assert!(!thread.is_suspended());
    }

    #[test]
    fn test_failed_suspend_does_not_resume()
    {
        let thread = SimulatedThread::new();
        thread.fail_next_suspend();
        assert!(ThreadSuspendGuard::new(&thread).is_err());
        assert_eq!(thread.resume_count(), 0);
    }
}
