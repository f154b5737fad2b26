//! Tests for platform-agnostic types

use faultline_core::fault::{AccessKind, MemoryAccess};
use faultline_core::types::{Architecture, X86Registers, X86_64Registers};
use faultline_core::{Address, FaultCode, FaultRecord, PendingTransfer, RegisterContext, ThreadId, ThreadState};

#[test]
fn test_address_arithmetic()
{
    let addr = Address::new(0x1000);
    assert_eq!((addr + 0x10).value(), 0x1010);
    assert_eq!((addr - 1).value(), 0xfff);
    assert_eq!(addr & 0xff0, 0);
    assert!(Address::ZERO.is_null());
    assert!(!addr.is_null());
}

#[test]
fn test_address_formatting()
{
    let addr = Address::new(0xdead_beef);
    assert_eq!(addr.to_string(), "0x00000000deadbeef");
    assert_eq!(format!("{addr:x}"), "deadbeef");
    assert_eq!(u64::from(addr), 0xdead_beef);
    assert_eq!(Address::from(0x10usize), Address::new(0x10));
}

#[test]
fn test_architecture_word_sizes()
{
    assert_eq!(Architecture::X86_64.word_size(), 8);
    assert_eq!(Architecture::X86.word_size(), 4);
    assert_eq!(X86_64Registers::default().word_size(), 8);
    assert_eq!(X86Registers::default().word_size(), 4);
}

#[test]
fn test_x86_64_register_accessors()
{
    let mut regs = X86_64Registers {
        rip: 0x4000,
        rsp: 0x8000,
        rbp: 0x8010,
        rflags: 0x246,
        ..X86_64Registers::default()
    };
    assert_eq!(regs.instruction_pointer(), Address::new(0x4000));
    assert_eq!(regs.frame_pointer(), Address::new(0x8010));
    assert_eq!(regs.flags(), 0x246);

    regs.set_instruction_pointer(Address::new(0x5000));
    regs.set_stack_pointer(Address::new(0x7ff8));
    assert_eq!(regs.rip, 0x5000);
    assert_eq!(regs.rsp, 0x7ff8);
}

#[test]
fn test_x86_register_accessors_truncate()
{
    let mut regs = X86Registers::default();
    regs.set_stack_pointer(Address::new(0x1_0000_1000));
    assert_eq!(regs.esp, 0x1000);
    assert_eq!(regs.stack_pointer(), Address::new(0x1000));
}

#[test]
fn test_push_word_writes_below_stack_pointer()
{
    let mut stack = [0xffu64; 8];
    let top = stack.as_mut_ptr() as u64 + 8 * 8;
    let mut regs = X86_64Registers {
        rsp: top,
        ..X86_64Registers::default()
    };

    unsafe {
        regs.push_word(0x1122);
        regs.push_word(0x3344);
    }
    assert_eq!(regs.rsp, top - 16);
    assert_eq!(stack[7], 0x1122);
    assert_eq!(stack[6], 0x3344);
    assert_eq!(stack[5], 0xff);
}

#[test]
fn test_thread_id()
{
    assert!(ThreadId::MAIN.is_main());
    assert!(!ThreadId(3).is_main());
    assert_eq!(ThreadId::from(3).raw(), 3);
    assert_eq!(ThreadId(3).to_string(), "thread 3");
}

#[test]
fn test_thread_state_defaults()
{
    let state = ThreadState::new(ThreadId(2));
    assert_eq!(state.tid(), ThreadId(2));
    assert!(!state.is_deferring());
    assert!(!state.is_io_wait());
    assert_eq!(state.current_task(), 0);
    assert_eq!(state.safe_restore(), None);
    assert_eq!(state.pending(), None);
    assert_eq!(state.backtrace_len(), 0);
    assert!(!state.needs_stack_guard_reset());
}

#[test]
fn test_safe_restore_is_taken_once()
{
    let state = ThreadState::new(ThreadId(1));
    state.set_safe_restore(0x40);
    assert_eq!(state.safe_restore(), Some(0x40));
    assert_eq!(state.take_safe_restore(), Some(0x40));
    assert_eq!(state.take_safe_restore(), None);
    assert_eq!(state.take_pending(), None::<PendingTransfer>);
}

#[test]
fn test_fault_record_from_parts()
{
    let ip = Address::new(0x1400);
    let write = FaultRecord::from_parts(FaultCode::ACCESS_VIOLATION.raw(), 0, ip, &[1, 0x2000]);
    assert_eq!(
        write.access,
        Some(MemoryAccess {
            kind: Some(AccessKind::Write),
            address: Address::new(0x2000),
        })
    );

    let short = FaultRecord::from_parts(FaultCode::ACCESS_VIOLATION.raw(), 0, ip, &[1]);
    assert_eq!(short.access, None);

    let other = FaultRecord::from_parts(FaultCode::INT_DIVIDE_BY_ZERO.raw(), 0, ip, &[1, 0x2000]);
    assert_eq!(other.access, None);
    assert_eq!(other.code, FaultCode::INT_DIVIDE_BY_ZERO);
}

#[test]
fn test_fault_code_names()
{
    assert_eq!(FaultCode::ACCESS_VIOLATION.to_string(), "EXCEPTION_ACCESS_VIOLATION");
    assert_eq!(FaultCode::STACK_OVERFLOW.name(), "EXCEPTION_STACK_OVERFLOW");
    for code in FaultCode::KNOWN {
        assert!(code.name().starts_with("EXCEPTION_"), "{code:?}");
    }
    assert_eq!(FaultCode(0xE06D_7363).name(), "UNKNOWN");
}
