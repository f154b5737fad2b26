//! # CRT signals
//!
//! Signal numbers and floating-point sub-codes of the Microsoft C runtime,
//! and the decision table for the CRT `signal()` handler.
//!
//! The MSVC CRT numbers its signals differently from POSIX (`SIGABRT` is 22,
//! `SIGBREAK` exists) so the values are spelled out here instead of coming
//! from `libc` on non-Windows hosts.
//!
//! See: [signal (CRT)](https://learn.microsoft.com/en-us/cpp/c-runtime-library/reference/signal)

use crate::exception::{ExceptionTable, ExceptionValue};

pub const SIGINT: i32 = 2;
pub const SIGILL: i32 = 4;
pub const SIGABRT_COMPAT: i32 = 6;
pub const SIGFPE: i32 = 8;
pub const SIGSEGV: i32 = 11;
pub const SIGTERM: i32 = 15;
pub const SIGBREAK: i32 = 21;
pub const SIGABRT: i32 = 22;

/// Signals the CRT handler is installed for.
pub const HANDLED_SIGNALS: [i32; 6] = [SIGFPE, SIGILL, SIGINT, SIGSEGV, SIGTERM, SIGABRT];

/// Exit status used when a console interrupt terminates the process.
pub const fn interrupt_exit_status(signal: i32) -> i32
{
    128 + signal
}

/// Name of a CRT signal, `"?"` for anything else.
pub const fn signal_name(signal: i32) -> &'static str
{
    match signal {
        SIGINT => "SIGINT",
        SIGILL => "SIGILL",
        SIGABRT_COMPAT => "SIGABRT_COMPAT",
        SIGFPE => "SIGFPE",
        SIGSEGV => "SIGSEGV",
        SIGTERM => "SIGTERM",
        SIGBREAK => "SIGBREAK",
        SIGABRT => "SIGABRT",
        _ => "?",
    }
}

/// Second argument of a SIGFPE handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FpeCode(pub i32);

impl FpeCode
{
    pub const INVALID: Self = FpeCode(0x81);
    pub const DENORMAL: Self = FpeCode(0x82);
    pub const ZERODIVIDE: Self = FpeCode(0x83);
    pub const OVERFLOW: Self = FpeCode(0x84);
    pub const UNDERFLOW: Self = FpeCode(0x85);
    pub const INEXACT: Self = FpeCode(0x86);
    pub const UNEMULATED: Self = FpeCode(0x87);
    pub const SQRTNEG: Self = FpeCode(0x88);
    pub const STACKOVERFLOW: Self = FpeCode(0x8a);
    pub const STACKUNDERFLOW: Self = FpeCode(0x8b);
    /// `raise(SIGFPE)`
    pub const EXPLICITGEN: Self = FpeCode(0x8c);

    /// Every sub-code the CRT documents.
    pub const KNOWN: [FpeCode; 11] = [
        Self::INVALID,
        Self::DENORMAL,
        Self::ZERODIVIDE,
        Self::OVERFLOW,
        Self::UNDERFLOW,
        Self::INEXACT,
        Self::UNEMULATED,
        Self::SQRTNEG,
        Self::STACKOVERFLOW,
        Self::STACKUNDERFLOW,
        Self::EXPLICITGEN,
    ];

    /// `_FPE_*` name, or `"?"`.
    pub const fn name(self) -> &'static str
    {
        match self.0 {
            0x81 => "_FPE_INVALID",
            0x82 => "_FPE_DENORMAL",
            0x83 => "_FPE_ZERODIVIDE",
            0x84 => "_FPE_OVERFLOW",
            0x85 => "_FPE_UNDERFLOW",
            0x86 => "_FPE_INEXACT",
            0x87 => "_FPE_UNEMULATED",
            0x88 => "_FPE_SQRTNEG",
            0x8a => "_FPE_STACKOVERFLOW",
            0x8b => "_FPE_STACKUNDERFLOW",
            0x8c => "_FPE_EXPLICITGEN",
            _ => "?",
        }
    }
}

/// What the CRT signal handler must do after returning from the decision logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrtAction
{
    /// Throw this exception on the current thread
    Throw(ExceptionValue),
    /// Throw the runtime's internal error: `"Unexpected FPE Error 0x{code:X}"`
    InternalError(FpeCode),
    /// Return from the handler; nothing to do
    Continue,
    /// Exit the process with this status
    Exit(i32),
    /// Unwind to the active guarded probe
    Restore(usize),
    /// Print a crash report and re-raise the signal with the default action
    Fatal(i32),
}

/// Decide how a SIGFPE with `code` is handled.
///
/// Only division by zero maps to an exception; every other sub-code is an
/// internal error. A division error before the runtime created its
/// exception objects is fatal.
pub fn fpe_action(code: FpeCode, exceptions: &ExceptionTable) -> CrtAction
{
    match code {
        FpeCode::ZERODIVIDE => match exceptions.divide_error {
            Some(value) => CrtAction::Throw(value),
            None => CrtAction::Fatal(SIGFPE),
        },
        other => CrtAction::InternalError(other),
    }
}
