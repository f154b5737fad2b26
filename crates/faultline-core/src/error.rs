//! # Error Types
//!
//! General error handling for the signal subsystem.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Only the operations that run in ordinary thread context return these
//! errors: installation, configuration and the OS thread-control primitives
//! (suspend, resume, get-context, set-context). Code that runs inside a fault
//! handler never builds an error value; it reports through
//! [`crate::report::DiagnosticSink`] and returns a [`crate::dispatch::Disposition`].

use thiserror::Error;

/// Main error type for signal-subsystem operations
///
/// ## Error Categories
///
/// 1. **Thread control errors**: SuspendFailed, ResumeFailed, GetContextFailed, SetContextFailed
/// 2. **Setup errors**: MainThreadNotSet, MainThreadAlreadySet, InstallFailed, InvalidConfig
/// 3. **Profiling errors**: ProfileBufferFull
/// 4. **Platform errors**: Win32 (Windows-specific)
/// 5. **I/O errors**: Io
#[derive(Error, Debug)]
pub enum FaultlineError
{
    /// Failed to suspend the target thread
    ///
    /// On Windows this is `SuspendThread` returning `(DWORD)-1`, usually because
    /// the handle lost `THREAD_SUSPEND_RESUME` access or the thread exited.
    #[error("Failed to suspend thread: {0}")]
    SuspendFailed(String),

    /// Failed to resume the target thread
    ///
    /// Callers that hold a thread suspended must treat this as fatal: a thread
    /// that is never resumed silently wedges the process.
    #[error("Failed to resume thread: {0}")]
    ResumeFailed(String),

    /// Failed to read the register context of a suspended thread
    #[error("Failed to read thread context: {0}")]
    GetContextFailed(String),

    /// Failed to write the register context back to a suspended thread
    #[error("Failed to write thread context: {0}")]
    SetContextFailed(String),

    /// Interrupt delivery or profiling was requested before a main thread was registered
    ///
    /// ## Solution
    ///
    /// Call [`crate::SignalSubsystem::set_main_thread`] once at startup.
    #[error("Main thread has not been registered")]
    MainThreadNotSet,

    /// The main thread can only be registered once
    #[error("Main thread is already registered")]
    MainThreadAlreadySet,

    /// Installing an OS handler failed
    ///
    /// The string names the handler, e.g. `"SIGFPE"` or `"console control handler"`.
    #[error("Couldn't install {0}")]
    InstallFailed(String),

    /// The profile ring buffer cannot hold another sample
    #[error("Profile buffer is full ({capacity} words)")]
    ProfileBufferFull
    {
        /// Declared capacity of the buffer in words
        capacity: usize,
    },

    /// A configuration value was missing its invariants
    #[error("Invalid configuration for {key}: {reason}")]
    InvalidConfig
    {
        /// Configuration key (environment variable name)
        key: &'static str,
        /// Human readable reason
        reason: String,
    },

    /// Windows-specific Win32 API error
    ///
    /// This wraps `GetLastError()` codes. Common errors:
    /// - `ERROR_ACCESS_DENIED`: The handle lacks the required access right
    /// - `ERROR_INVALID_HANDLE`: The thread handle was closed
    ///
    /// See: [System Error Codes](https://learn.microsoft.com/en-us/windows/win32/debug/system-error-codes)
    #[cfg(all(windows, any(target_arch = "x86_64", target_arch = "x86")))]
    #[error("Win32 API error: {0}")]
    Win32(#[from] crate::platform::windows::error::Win32Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, FaultlineError>`
///
/// ```rust
/// use faultline_core::error::FaultlineResult;
/// fn foo() -> FaultlineResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type FaultlineResult<T> = std::result::Result<T, FaultlineError>;
