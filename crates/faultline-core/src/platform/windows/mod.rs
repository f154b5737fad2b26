//! # Windows Backend
//!
//! Fault and interrupt handling on Windows (x86 and x86_64).
//!
//! Windows delivers faults through three independent channels, and all three
//! end up in the same [`crate::SignalSubsystem`]:
//!
//! - **Structured exceptions**: the unhandled-exception filter sees hardware
//!   faults with the faulting thread's `CONTEXT`, which it can rewrite in place
//! - **CRT signals**: `signal()` handlers for SIGFPE, SIGILL, SIGINT, SIGSEGV,
//!   SIGTERM and SIGABRT, run on the faulting thread without a context
//! - **Console control events**: Ctrl-C and friends, delivered on a thread the
//!   OS creates for the purpose
//!
//! ## Key Win32 APIs Used
//!
//! - `SetUnhandledExceptionFilter()`: Top-level structured exception filter
//! - `SetConsoleCtrlHandler()`: Console interrupt callback
//! - `SuspendThread()` / `ResumeThread()`: Stop the main thread from another thread
//! - `GetThreadContext()` / `SetThreadContext()`: Read and rewrite its registers
//! - `timeGetDevCaps()` / `timeBeginPeriod()` / `timeEndPeriod()`: Profiler tick
//!
//! ## Dependencies
//!
//! - **winapi crate**: Win32 declarations
//! - **libc crate**: CRT `signal()` / `raise()`
//! - **extern "C"**: CRT helpers not in either (`_fpreset`, `_resetstkoflw`)
//!
//! ## References
//!
//! - [Structured Exception Handling](https://learn.microsoft.com/en-us/windows/win32/debug/structured-exception-handling)
//! - [signal (CRT)](https://learn.microsoft.com/en-us/cpp/c-runtime-library/reference/signal)
//! - [HandlerRoutine](https://learn.microsoft.com/en-us/windows/console/handlerroutine)

pub mod context;
pub mod error;
pub mod ffi;
pub mod handlers;
pub mod threads;
pub mod timer;

pub use handlers::{install_default_signal_handlers, install_sigint_handler, reset_stack_guard_if_needed, restore_signals};
pub use threads::Win32Thread;
pub use timer::MultimediaTimer;
