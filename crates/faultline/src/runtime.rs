//! Stand-in runtime for driving the subsystem from the command line.
//!
//! There is no managed heap or unwinder behind it: exception objects are
//! small integers, the trampoline and safepoint page are fixed addresses that
//! are never executed, and "backtraces" are the context's instruction and
//! frame pointers.

use std::fmt;
use std::process;

use faultline_core::types::{Address, RegisterContext};
use faultline_core::{ExceptionKind, ExceptionTable, ExceptionValue, RuntimeHooks};

/// Address a redirected thread resumes at.
pub const TRAMPOLINE: Address = Address::new(0x7ff6_0000_1000);

/// Base of the protected safepoint page.
pub const SAFEPOINT_PAGE: Address = Address::new(0x7ff6_1000_0000);

const PAGE_SIZE: u64 = 0x1000;

const KINDS: [ExceptionKind; 4] = [
    ExceptionKind::DivideError,
    ExceptionKind::StackOverflow,
    ExceptionKind::ReadOnlyMemory,
    ExceptionKind::Interrupt,
];

/// Runtime hooks for the CLI
#[derive(Debug, Default)]
pub struct DemoRuntime;

impl DemoRuntime
{
    /// Name of the exception behind `value`.
    pub fn describe(value: ExceptionValue) -> &'static str
    {
        KINDS
            .into_iter()
            .find(|kind| exception_value(*kind) == Some(value))
            .map_or("unknown exception", ExceptionKind::name)
    }
}

fn exception_value(kind: ExceptionKind) -> Option<ExceptionValue>
{
    let index = KINDS.iter().position(|k| *k == kind)?;
    ExceptionValue::new(0x100 + index)
}

impl RuntimeHooks for DemoRuntime
{
    fn exceptions(&self) -> ExceptionTable
    {
        ExceptionTable {
            divide_error: exception_value(ExceptionKind::DivideError),
            stack_overflow: exception_value(ExceptionKind::StackOverflow),
            read_only_memory: exception_value(ExceptionKind::ReadOnlyMemory),
            interrupt: exception_value(ExceptionKind::Interrupt),
        }
    }

    fn throw_trampoline(&self) -> Address
    {
        TRAMPOLINE
    }

    fn record_backtrace(&self, context: &dyn RegisterContext, buffer: &mut [usize]) -> usize
    {
        let frames = [context.instruction_pointer(), context.frame_pointer()];
        let n = frames.len().min(buffer.len());
        for (slot, frame) in buffer.iter_mut().zip(frames).take(n) {
            *slot = frame.value() as usize;
        }
        n
    }

    fn is_safepoint_address(&self, address: Address) -> bool
    {
        address.value().wrapping_sub(SAFEPOINT_PAGE.value()) < PAGE_SIZE
    }

    fn symbolize(&self, pc: Address, out: &mut dyn fmt::Write) -> fmt::Result
    {
        write!(out, "faultline-demo (ip: 0x{pc:x})")
    }

    fn throw(&self, value: ExceptionValue) -> !
    {
        eprintln!("uncaught {}", Self::describe(value));
        process::exit(1)
    }

    fn internal_error(&self, message: fmt::Arguments<'_>) -> !
    {
        eprintln!("internal error: {message}");
        process::exit(1)
    }

    fn unwind_to_safe_restore(&self, marker: usize) -> !
    {
        eprintln!("no guarded probe to unwind to (marker {marker:#x})");
        process::exit(1)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_every_exception_is_distinct_and_named()
    {
        let table = DemoRuntime.exceptions();
        let values = [
            table.divide_error,
            table.stack_overflow,
            table.read_only_memory,
            table.interrupt,
        ];
        for (kind, value) in KINDS.iter().zip(values) {
            assert_eq!(DemoRuntime::describe(value.unwrap()), kind.name());
        }
    }

    #[test]
    fn test_safepoint_page_bounds()
    {
        assert!(DemoRuntime.is_safepoint_address(SAFEPOINT_PAGE));
        assert!(DemoRuntime.is_safepoint_address(SAFEPOINT_PAGE + 0xfff));
        assert!(!DemoRuntime.is_safepoint_address(SAFEPOINT_PAGE + 0x1000));
        assert!(!DemoRuntime.is_safepoint_address(SAFEPOINT_PAGE - 1));
    }
}
