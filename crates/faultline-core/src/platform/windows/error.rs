//! # Win32 API Errors
//!
//! Win32 functions report failure through a sentinel return value and leave
//! the reason in the thread's last-error slot. This module turns that code
//! into a Rust error type.

use thiserror::Error;
use winapi::shared::winerror::{ERROR_ACCESS_DENIED, ERROR_INVALID_HANDLE};
use winapi::um::errhandlingapi::GetLastError;

/// Win32 error from `GetLastError()`
///
/// ## References
///
/// - [System Error Codes](https://learn.microsoft.com/en-us/windows/win32/debug/system-error-codes)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Win32Error
{
    /// `ERROR_ACCESS_DENIED` (5)
    ///
    /// The thread handle lacks `THREAD_SUSPEND_RESUME` or `THREAD_GET_CONTEXT`
    /// / `THREAD_SET_CONTEXT` access.
    #[error("ERROR_ACCESS_DENIED: Access is denied")]
    AccessDenied,

    /// `ERROR_INVALID_HANDLE` (6)
    #[error("ERROR_INVALID_HANDLE: The handle is invalid")]
    InvalidHandle,

    /// Any other code
    #[error("Win32 error {0}")]
    Other(u32),
}

impl Win32Error
{
    /// The calling thread's last error.
    pub fn last() -> Self
    {
        // SAFETY: `GetLastError` only reads thread-local state.
        Self::from(unsafe { GetLastError() })
    }
}

impl From<u32> for Win32Error
{
    fn from(code: u32) -> Self
    {
        match code {
            ERROR_ACCESS_DENIED => Win32Error::AccessDenied,
            ERROR_INVALID_HANDLE => Win32Error::InvalidHandle,
            other => Win32Error::Other(other),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_known_codes()
    {
        assert_eq!(Win32Error::from(5), Win32Error::AccessDenied);
        assert_eq!(Win32Error::from(6), Win32Error::InvalidHandle);
        assert_eq!(Win32Error::from(87), Win32Error::Other(87));
    }
}
