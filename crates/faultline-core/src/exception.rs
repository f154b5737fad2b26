//! # Exception values
//!
//! The runtime owns the exception objects; this crate only passes opaque
//! handles to them around. A handle is a non-zero word, normally the address
//! of a pre-allocated singleton, so that a fault handler can select one without
//! allocating.

use std::fmt;
use std::num::NonZeroUsize;

/// Opaque handle to a runtime exception object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionValue(NonZeroUsize);

impl ExceptionValue
{
    /// Wrap a raw handle; `None` for zero.
    pub const fn new(raw: usize) -> Option<Self>
    {
        match NonZeroUsize::new(raw) {
            Some(raw) => Some(ExceptionValue(raw)),
            None => None,
        }
    }

    /// Raw handle value.
    pub const fn get(self) -> usize
    {
        self.0.get()
    }
}

impl fmt::Display for ExceptionValue
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "exception@0x{:x}", self.0)
    }
}

/// Runtime exception kinds a fault can turn into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind
{
    /// Integer division by zero
    DivideError,
    /// Guard page of the thread stack was hit
    StackOverflow,
    /// Write to memory mapped read-only
    ReadOnlyMemory,
    /// Console interrupt delivered to the main thread
    Interrupt,
}

impl ExceptionKind
{
    /// Name used in diagnostics.
    pub const fn name(self) -> &'static str
    {
        match self {
            ExceptionKind::DivideError => "DivideError",
            ExceptionKind::StackOverflow => "StackOverflowError",
            ExceptionKind::ReadOnlyMemory => "ReadOnlyMemoryError",
            ExceptionKind::Interrupt => "InterruptException",
        }
    }
}

impl fmt::Display for ExceptionKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

/// The runtime's exception singletons
///
/// A field is `None` until the runtime has created that object; faults that
/// would map to a missing exception are treated as fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExceptionTable
{
    /// Thrown for integer division by zero.
    pub divide_error: Option<ExceptionValue>,
    /// Thrown when the stack guard page is hit.
    pub stack_overflow: Option<ExceptionValue>,
    /// Thrown for writes to read-only memory.
    pub read_only_memory: Option<ExceptionValue>,
    /// Thrown when a console interrupt is delivered.
    pub interrupt: Option<ExceptionValue>,
}

impl ExceptionTable
{
    /// Look up the singleton for `kind`.
    pub fn get(&self, kind: ExceptionKind) -> Option<ExceptionValue>
    {
        match kind {
            ExceptionKind::DivideError => self.divide_error,
            ExceptionKind::StackOverflow => self.stack_overflow,
            ExceptionKind::ReadOnlyMemory => self.read_only_memory,
            ExceptionKind::Interrupt => self.interrupt,
        }
    }

    /// Whether `value` is the stack-overflow singleton.
    pub fn is_stack_overflow(&self, value: ExceptionValue) -> bool
    {
        self.stack_overflow == Some(value)
    }
}

/// What the throw trampoline should do when the redirected thread resumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingTransfer
{
    /// Throw this exception
    Throw(ExceptionValue),
    /// Unwind to the guarded probe identified by this marker, without an exception
    Restore(usize),
}
