//! # faultline-core
//!
//! Turns hardware faults and console interrupts into a managed runtime's
//! exceptions, and samples the main thread's stack for profiling.
//!
//! This crate provides:
//! - Fault classification and dispatch ([`dispatch`]): divide-by-zero, stack
//!   overflow, read-only writes, safepoint polls and guarded probes
//! - Context redirection ([`redirect`]): rewriting a stopped thread so it
//!   resumes in the runtime's throw trampoline
//! - A secondary stack per thread ([`fiber`]) for stack-overflow backtraces
//! - Console interrupt delivery with deferral and force-escalation ([`interrupt`])
//! - A sampling profiler ([`profiler`])
//!
//! ## Platform Support
//!
//! - **Windows** (x86, x86_64): structured exceptions, CRT signals and
//!   console control events ([`platform::windows`])
//! - **Everywhere**: an in-process simulated backend
//!   ([`platform::simulated`]) that drives the same protocols in tests
//!
//! ## Why unsafe code is needed
//!
//! Fault handlers run on a thread whose state the OS has frozen. Rewriting
//! that state means writing to raw stack addresses, calling into the C
//! runtime and the Win32 thread APIs, and running code on a stack we
//! allocated ourselves. The unsafe parts are kept behind safe wrappers where
//! possible; the few entry points that remain `unsafe` document what the
//! caller must guarantee.

#![allow(unsafe_code)] // Required for context rewriting and Win32/CRT calls

pub mod config;
pub mod dispatch;
pub mod error;
pub mod exception;
pub mod fault;
pub mod fiber;
pub mod interrupt;
pub mod platform;
pub mod process;
pub mod profiler;
pub mod redirect;
pub mod report;
pub mod runtime;
pub mod safepoint;
pub mod signals;
pub mod types;

pub use config::SignalConfig;
pub use dispatch::{Disposition, FaultClass};
// Re-export commonly used types
pub use error::{FaultlineError, FaultlineResult};
pub use exception::{ExceptionKind, ExceptionTable, ExceptionValue, PendingTransfer};
pub use fault::{FaultCode, FaultRecord};
pub use interrupt::{ConsoleEvent, InterruptOutcome};
pub use process::{current_thread, MainThread, SignalSubsystem};
pub use profiler::{Profiler, ProfilerError};
pub use report::{DiagnosticSink, Termination};
pub use runtime::RuntimeHooks;
pub use types::{Address, RegisterContext, ThreadId, ThreadState};
