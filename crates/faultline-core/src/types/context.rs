//! # Register Context
//!
//! Read/write view over the saved CPU state of a stopped thread.
//!
//! A register context is whatever the OS hands us for a thread that is not
//! currently running: the `CONTEXT` record of a structured exception, the
//! result of `GetThreadContext` on a suspended thread, or an in-memory
//! snapshot in tests. The dispatcher and redirection code only ever see
//! `&mut dyn RegisterContext`, which keeps them independent of the
//! architecture.
//!
//! ## Writing the stack
//!
//! [`RegisterContext::push_word`] stores directly through the stack pointer.
//! This is sound only because every context we rewrite belongs to a thread of
//! the current process whose stack is mapped and not in use while it is stopped.

use std::fmt;

use super::Address;

/// CPU architecture of a register context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit x86 (`Rip`, `Rsp`, 8-byte call slots)
    X86_64,
    /// 32-bit x86 (`Eip`, `Esp`, 4-byte call slots)
    X86,
}

impl Architecture
{
    /// Width of one stack slot in bytes.
    pub const fn word_size(self) -> u64
    {
        match self {
            Architecture::X86_64 => 8,
            Architecture::X86 => 4,
        }
    }

    /// Architecture this crate was compiled for, if the backend supports it.
    pub const fn native() -> Option<Self>
    {
        if cfg!(target_arch = "x86_64") {
            Some(Architecture::X86_64)
        } else if cfg!(target_arch = "x86") {
            Some(Architecture::X86)
        } else {
            None
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::X86 => write!(f, "x86"),
        }
    }
}

/// Architecture-neutral access to a stopped thread's registers.
///
/// Implementations exist for the Win32 `CONTEXT` record and for the plain
/// snapshot structs [`X86_64Registers`] and [`X86Registers`].
pub trait RegisterContext
{
    /// Layout of this context.
    fn architecture(&self) -> Architecture;

    /// Address of the next instruction the thread will execute.
    fn instruction_pointer(&self) -> Address;

    /// Redirect the thread to `address` when it resumes.
    fn set_instruction_pointer(&mut self, address: Address);

    /// Current stack pointer.
    fn stack_pointer(&self) -> Address;

    /// Replace the stack pointer.
    fn set_stack_pointer(&mut self, address: Address);

    /// Frame pointer (`Rbp`/`Ebp`), used by frame-pointer walkers.
    fn frame_pointer(&self) -> Address;

    /// Raw flags register.
    fn flags(&self) -> u64;

    /// Width of one stack slot in bytes.
    fn word_size(&self) -> u64
    {
        self.architecture().word_size()
    }

    /// Decrement the stack pointer by one word and store `value` there.
    ///
    /// # Safety
    ///
    /// The word below the current stack pointer must be mapped, writable
    /// memory of this process that nothing else is using.
    unsafe fn push_word(&mut self, value: u64)
    {
        let word = self.word_size();
        let sp = self.stack_pointer() - word;
        // SAFETY: forwarded to the caller.
        unsafe { store_word(sp, value, word) };
        self.set_stack_pointer(sp);
    }
}

/// Write one stack slot of `word` bytes at `at`.
///
/// # Safety
///
/// `at..at + word` must be valid for writes.
pub(crate) unsafe fn store_word(at: Address, value: u64, word: u64)
{
    unsafe {
        if word == 8 {
            at.as_mut_ptr::<u64>().write_unaligned(value);
        } else {
            at.as_mut_ptr::<u32>().write_unaligned(value as u32);
        }
    }
}

/// Snapshot of the x86_64 control and integer registers
///
/// Mirrors the subset of `CONTEXT` selected by `CONTEXT_CONTROL | CONTEXT_INTEGER`
/// that the rest of the crate reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct X86_64Registers
{
    /// Instruction pointer
    pub rip: u64,
    /// Stack pointer
    pub rsp: u64,
    /// Frame pointer
    pub rbp: u64,
    /// Flags register
    pub rflags: u64,
    /// Accumulator
    pub rax: u64,
    /// Base register
    pub rbx: u64,
    /// Counter register
    pub rcx: u64,
    /// Data register
    pub rdx: u64,
    /// Source index
    pub rsi: u64,
    /// Destination index
    pub rdi: u64,
}

impl RegisterContext for X86_64Registers
{
    fn architecture(&self) -> Architecture
    {
        Architecture::X86_64
    }

    fn instruction_pointer(&self) -> Address
    {
        Address::new(self.rip)
    }

    fn set_instruction_pointer(&mut self, address: Address)
    {
        self.rip = address.value();
    }

    fn stack_pointer(&self) -> Address
    {
        Address::new(self.rsp)
    }

    fn set_stack_pointer(&mut self, address: Address)
    {
        self.rsp = address.value();
    }

    fn frame_pointer(&self) -> Address
    {
        Address::new(self.rbp)
    }

    fn flags(&self) -> u64
    {
        self.rflags
    }
}

/// Snapshot of the 32-bit x86 control and integer registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct X86Registers
{
    /// Instruction pointer
    pub eip: u32,
    /// Stack pointer
    pub esp: u32,
    /// Frame pointer
    pub ebp: u32,
    /// Flags register
    pub eflags: u32,
    /// Accumulator
    pub eax: u32,
    /// Counter register
    pub ecx: u32,
    /// Data register
    pub edx: u32,
}

impl RegisterContext for X86Registers
{
    fn architecture(&self) -> Architecture
    {
        Architecture::X86
    }

    fn instruction_pointer(&self) -> Address
    {
        Address::new(u64::from(self.eip))
    }

    fn set_instruction_pointer(&mut self, address: Address)
    {
        self.eip = address.value() as u32;
    }

    fn stack_pointer(&self) -> Address
    {
        Address::new(u64::from(self.esp))
    }

    fn set_stack_pointer(&mut self, address: Address)
    {
        self.esp = address.value() as u32;
    }

    fn frame_pointer(&self) -> Address
    {
        Address::new(u64::from(self.ebp))
    }

    fn flags(&self) -> u64
    {
        u64::from(self.eflags)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_push_word_writes_below_stack_pointer()
    {
        let mut stack = [0xAAu64; 8];
        let top = stack.as_mut_ptr() as u64 + 8 * 8;
        let mut regs = X86_64Registers {
            rsp: top,
            ..X86_64Registers::default()
        };

        unsafe { regs.push_word(0x1234) };

        assert_eq!(regs.rsp, top - 8);
        assert_eq!(stack[7], 0x1234);
        assert_eq!(stack[6], 0xAA);
    }

    #[test]
    fn test_x86_push_word_uses_four_byte_slots()
    {
        let mut stack = [0xFFFF_FFFFu32; 4];
        let top = stack.as_mut_ptr() as u64 + 4 * 4;
        let mut regs = X86Registers {
            esp: top as u32,
            ..X86Registers::default()
        };
        // Only meaningful when the buffer lives below 4 GiB.
        if u64::from(regs.esp) != top {
            return;
        }

        unsafe { regs.push_word(0) };

        assert_eq!(u64::from(regs.esp), top - 4);
        assert_eq!(stack[3], 0);
        assert_eq!(stack[2], 0xFFFF_FFFF);
    }

    #[test]
    fn test_word_size_follows_architecture()
    {
        assert_eq!(X86_64Registers::default().word_size(), 8);
        assert_eq!(X86Registers::default().word_size(), 4);
    }
}
