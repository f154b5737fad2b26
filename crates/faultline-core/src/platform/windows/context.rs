//! # Win32 `CONTEXT` access
//!
//! [`RegisterContext`] for the native `CONTEXT` record, so the dispatcher can
//! rewrite the record the exception filter receives and the interrupt path
//! can rewrite the one `GetThreadContext` fills.

use winapi::um::winnt::CONTEXT;

use crate::types::{Address, Architecture, RegisterContext};

#[cfg(target_arch = "x86_64")]
impl RegisterContext for CONTEXT
{
    fn architecture(&self) -> Architecture
    {
        Architecture::X86_64
    }

    fn instruction_pointer(&self) -> Address
    {
        Address::new(self.Rip)
    }

    fn set_instruction_pointer(&mut self, address: Address)
    {
        self.Rip = address.value();
    }

    fn stack_pointer(&self) -> Address
    {
        Address::new(self.Rsp)
    }

    fn set_stack_pointer(&mut self, address: Address)
    {
        self.Rsp = address.value();
    }

    fn frame_pointer(&self) -> Address
    {
        Address::new(self.Rbp)
    }

    fn flags(&self) -> u64
    {
        u64::from(self.EFlags)
    }
}

#[cfg(target_arch = "x86")]
impl RegisterContext for CONTEXT
{
    fn architecture(&self) -> Architecture
    {
        Architecture::X86
    }

    fn instruction_pointer(&self) -> Address
    {
        Address::new(u64::from(self.Eip))
    }

    fn set_instruction_pointer(&mut self, address: Address)
    {
        self.Eip = address.value() as u32;
    }

    fn stack_pointer(&self) -> Address
    {
        Address::new(u64::from(self.Esp))
    }

    fn set_stack_pointer(&mut self, address: Address)
    {
        self.Esp = address.value() as u32;
    }

    fn frame_pointer(&self) -> Address
    {
        Address::new(u64::from(self.Ebp))
    }

    fn flags(&self) -> u64
    {
        u64::from(self.EFlags)
    }
}

/// A zeroed `CONTEXT` requesting the control and integer registers.
pub fn control_integer_context() -> CONTEXT
{
    // SAFETY: `CONTEXT` is plain old data; all-zero is a valid value.
    let mut context: CONTEXT = unsafe { std::mem::zeroed() };
    context.ContextFlags = super::ffi::CONTEXT_CONTROL_INTEGER;
    context
}
