//! # Simulated thread backend
//!
//! A [`ThreadControl`] over an in-memory x86_64 register file and a real,
//! heap-allocated stack. It behaves like a suspended OS thread as far as the
//! interrupt and profiling protocols can tell:
//!
//! - contexts can only be read or written while suspended
//! - suspensions nest
//! - `push_word` on its context writes into its own stack buffer
//!
//! Each OS primitive can be made to fail once, which is how the error paths of
//! the delivery and sampling loops are exercised.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{FaultlineError, FaultlineResult};
use crate::platform::{ContextAccess, ThreadControl};
use crate::types::{Address, RegisterContext, X86_64Registers};

/// Default stack size of a simulated thread, in words.
pub const SIMULATED_STACK_WORDS: usize = 1024;

/// Instruction pointer a fresh simulated thread starts at.
pub const SIMULATED_ENTRY: u64 = 0x1_4000_1000;

/// An in-process stand-in for a suspendable OS thread
#[derive(Debug)]
pub struct SimulatedThread
{
    registers: Mutex<X86_64Registers>,
    stack: Box<[AtomicU64]>,
    depth: AtomicU32,
    suspends: AtomicUsize,
    resumes: AtomicUsize,
    context_writes: AtomicUsize,
    fail_suspend: AtomicBool,
    fail_resume: AtomicBool,
    fail_get_context: AtomicBool,
    fail_set_context: AtomicBool,
}

impl Default for SimulatedThread
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl SimulatedThread
{
    /// A running thread with a [`SIMULATED_STACK_WORDS`]-word stack.
    ///
    /// The stack pointer starts 8 bytes off 16-byte alignment, the way it is
    /// right after a `call`.
    pub fn new() -> Self
    {
        Self::with_stack_words(SIMULATED_STACK_WORDS)
    }

    /// A running thread with a stack of `words` 8-byte slots.
    pub fn with_stack_words(words: usize) -> Self
    {
        let stack: Box<[AtomicU64]> = (0..words.max(8)).map(|_| AtomicU64::new(0xCCCC_CCCC_CCCC_CCCC)).collect();
        let top = stack.as_ptr() as u64 + (stack.len() as u64) * 8;
        let rsp = (top & !15) - 0x28;
        let registers = X86_64Registers {
            rip: SIMULATED_ENTRY,
            rsp,
            rbp: rsp + 0x20,
            rflags: 0x246,
            ..X86_64Registers::default()
        };
        Self {
            registers: Mutex::new(registers),
            stack,
            depth: AtomicU32::new(0),
            suspends: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            context_writes: AtomicUsize::new(0),
            fail_suspend: AtomicBool::new(false),
            fail_resume: AtomicBool::new(false),
            fail_get_context: AtomicBool::new(false),
            fail_set_context: AtomicBool::new(false),
        }
    }

    /// Current registers.
    pub fn registers(&self) -> X86_64Registers
    {
        *self.registers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the registers, as if the thread had executed some code.
    pub fn set_registers(&self, registers: X86_64Registers)
    {
        *self.registers.lock().unwrap_or_else(PoisonError::into_inner) = registers;
    }

    /// Advance the instruction pointer by one 4-byte instruction if the
    /// thread is running; returns whether it moved.
    pub fn step(&self) -> bool
    {
        if self.is_suspended() {
            return false;
        }
        let mut registers = self.registers.lock().unwrap_or_else(PoisonError::into_inner);
        registers.rip = SIMULATED_ENTRY + (registers.rip.wrapping_sub(SIMULATED_ENTRY) + 4) % 0x1000;
        true
    }

    /// Read a word of this thread's stack; `None` outside the buffer.
    pub fn stack_word(&self, address: Address) -> Option<u64>
    {
        let base = self.stack.as_ptr() as u64;
        let offset = address.value().checked_sub(base)?;
        if offset % 8 != 0 {
            return None;
        }
        self.stack
            .get(usize::try_from(offset / 8).ok()?)
            .map(|word| word.load(Ordering::SeqCst))
    }

    /// Whether at least one suspension is outstanding.
    pub fn is_suspended(&self) -> bool
    {
        self.depth.load(Ordering::SeqCst) > 0
    }

    /// Successful `suspend` calls so far.
    pub fn suspend_count(&self) -> usize
    {
        self.suspends.load(Ordering::SeqCst)
    }

    /// Successful `resume` calls so far.
    pub fn resume_count(&self) -> usize
    {
        self.resumes.load(Ordering::SeqCst)
    }

    /// Contexts written back so far.
    pub fn context_write_count(&self) -> usize
    {
        self.context_writes.load(Ordering::SeqCst)
    }

    /// Make the next `suspend` fail.
    pub fn fail_next_suspend(&self)
    {
        self.fail_suspend.store(true, Ordering::SeqCst);
    }

    /// Make the next `resume` fail (the thread stays suspended).
    pub fn fail_next_resume(&self)
    {
        self.fail_resume.store(true, Ordering::SeqCst);
    }

    /// Make the next context read fail.
    pub fn fail_next_get_context(&self)
    {
        self.fail_get_context.store(true, Ordering::SeqCst);
    }

    /// Make the next context write-back fail.
    pub fn fail_next_set_context(&self)
    {
        self.fail_set_context.store(true, Ordering::SeqCst);
    }
}

impl ThreadControl for SimulatedThread
{
    fn suspend(&self) -> FaultlineResult<()>
    {
        if self.fail_suspend.swap(false, Ordering::SeqCst) {
            return Err(FaultlineError::SuspendFailed("simulated failure".to_string()));
        }
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.suspends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> FaultlineResult<()>
    {
        if self.fail_resume.swap(false, Ordering::SeqCst) {
            return Err(FaultlineError::ResumeFailed("simulated failure".to_string()));
        }
        let previous = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| depth.checked_sub(1))
            .map_err(|_| FaultlineError::ResumeFailed("thread is not suspended".to_string()))?;
        debug_assert!(previous > 0);
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn with_context(&self, access: ContextAccess, f: &mut dyn FnMut(&mut dyn RegisterContext)) -> FaultlineResult<()>
    {
        if !self.is_suspended() {
            return Err(FaultlineError::GetContextFailed("thread is running".to_string()));
        }
        if self.fail_get_context.swap(false, Ordering::SeqCst) {
            return Err(FaultlineError::GetContextFailed("simulated failure".to_string()));
        }

        let mut registers = self.registers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot = *registers;
        f(&mut snapshot);

        if access == ContextAccess::ReadWrite {
            if self.fail_set_context.swap(false, Ordering::SeqCst) {
                return Err(FaultlineError::SetContextFailed("simulated failure".to_string()));
            }
            *registers = snapshot;
            self.context_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_context_requires_suspension()
    {
        let thread = SimulatedThread::new();
        let result = thread.with_context(ContextAccess::Read, &mut |_| {});
        assert!(matches!(result, Err(FaultlineError::GetContextFailed(_))));
    }

    #[test]
    fn test_read_access_discards_changes()
    {
        let thread = SimulatedThread::new();
        let before = thread.registers();
        thread.suspend().unwrap();
        thread
            .with_context(ContextAccess::Read, &mut |ctx| ctx.set_instruction_pointer(Address::new(1)))
            .unwrap();
        thread.resume().unwrap();
        assert_eq!(thread.registers(), before);
    }

    #[test]
    fn test_push_word_lands_in_own_stack()
    {
        let thread = SimulatedThread::new();
        thread.suspend().unwrap();
        thread
            .with_context(ContextAccess::ReadWrite, &mut |ctx| unsafe { ctx.push_word(0x55) })
            .unwrap();
        thread.resume().unwrap();

        let rsp = Address::new(thread.registers().rsp);
        assert_eq!(thread.stack_word(rsp), Some(0x55));
        assert_eq!(thread.context_write_count(), 1);
    }

    #[test]
    fn test_step_only_moves_running_thread()
    {
        let thread = SimulatedThread::new();
        assert!(thread.step());
        assert_eq!(thread.registers().rip, SIMULATED_ENTRY + 4);
        thread.suspend().unwrap();
        assert!(!thread.step());
    }

    #[test]
    fn test_unbalanced_resume_fails()
    {
        let thread = SimulatedThread::new();
        assert!(matches!(thread.resume(), Err(FaultlineError::ResumeFailed(_))));
    }
}
