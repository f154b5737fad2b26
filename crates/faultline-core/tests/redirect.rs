//! Tests for control-flow redirection and the secondary backtrace stack

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use common::*;
use faultline_core::fiber;
use faultline_core::platform::guards::ThreadSuspendGuard;
use faultline_core::platform::simulated::SimulatedThread;
use faultline_core::platform::{ContextAccess, ThreadControl};
use faultline_core::{
    current_thread, Address, Disposition, FaultCode, FaultRecord, PendingTransfer, SignalSubsystem, ThreadId,
    ThreadState,
};

fn redirect_with(
    subsystem: &SignalSubsystem,
    state: &ThreadState,
    thread: &SimulatedThread,
    exception: Option<usize>,
) -> Disposition
{
    let guard = ThreadSuspendGuard::new(thread).unwrap();
    let mut disposition = Disposition::ContinueSearch;
    thread
        .with_context(ContextAccess::ReadWrite, &mut |ctx| {
            disposition = unsafe { subsystem.redirect(state, exception.map(value), ctx) };
        })
        .unwrap();
    guard.resume().unwrap();
    disposition
}

fn distance(a: usize, b: usize) -> usize
{
    a.max(b) - a.min(b)
}

#[test]
fn test_redirect_aligns_for_every_misalignment()
{
    let fx = fixture();
    let state = ThreadState::new(ThreadId(1));
    let thread = SimulatedThread::new();
    let base = thread.registers();

    for offset in 0..16u64 {
        let mut regs = base;
        regs.rsp = base.rsp - 64 - offset;
        regs.rip = 0x1_4000_2000 + offset;
        thread.set_registers(regs);

        let disposition = redirect_with(&fx.subsystem, &state, &thread, Some(DIVIDE_ERROR));
        assert_eq!(disposition, Disposition::ContinueExecution);

        let after = thread.registers();
        assert_eq!(after.rsp % 16, 8, "offset {offset}");
        assert!(after.rsp < regs.rsp);
        assert!(regs.rsp - after.rsp <= 24, "offset {offset}");
        assert_eq!(after.rip, TRAMPOLINE);
        assert_eq!(thread.stack_word(Address::new(after.rsp)), Some(0));
    }
}

#[test]
fn test_redirect_without_exception_clears_backtrace()
{
    let fx = fixture();
    let state = ThreadState::new(ThreadId(1));
    let thread = SimulatedThread::new();

    redirect_with(&fx.subsystem, &state, &thread, Some(DIVIDE_ERROR));
    assert_eq!(state.backtrace_len(), 2);
    assert_eq!(state.take_pending(), Some(PendingTransfer::Throw(value(DIVIDE_ERROR))));

    redirect_with(&fx.subsystem, &state, &thread, None);
    assert_eq!(state.backtrace_len(), 0);
    assert_eq!(state.pending(), None);
    assert_eq!(thread.registers().rip, TRAMPOLINE);
}

#[test]
fn test_safe_restore_wins_over_exception()
{
    let fx = fixture();
    let state = ThreadState::new(ThreadId(1));
    let thread = SimulatedThread::new();
    state.set_safe_restore(0x5150);

    redirect_with(&fx.subsystem, &state, &thread, Some(READ_ONLY_MEMORY));
    assert_eq!(state.pending(), Some(PendingTransfer::Restore(0x5150)));
    assert_eq!(state.safe_restore(), None);
    assert_eq!(fx.hooks.backtraces.load(Ordering::SeqCst), 0);

    // The marker is single-use.
    redirect_with(&fx.subsystem, &state, &thread, Some(READ_ONLY_MEMORY));
    assert_eq!(state.pending(), Some(PendingTransfer::Throw(value(READ_ONLY_MEMORY))));
}

#[test]
fn test_stack_overflow_walks_on_secondary_stack()
{
    let fx = fixture();
    let subsystem = Arc::clone(&fx.subsystem);
    let hooks = Arc::clone(&fx.hooks);

    thread::spawn(move || {
        let state = Arc::new(ThreadState::new(ThreadId(6)));
        subsystem.install_thread_handler(Arc::clone(&state));
        assert!(fiber::is_installed());
        assert!(current_thread().is_some_and(|t| Arc::ptr_eq(&t, &state)));

        let thread = SimulatedThread::new();
        let here = 0u8;
        let here = std::hint::black_box(&here) as *const u8 as usize;

        let record = FaultRecord::new(FaultCode::STACK_OVERFLOW, Address::new(thread.registers().rip));
        assert_eq!(raise(&subsystem, &state, &thread, &record), Disposition::ContinueExecution);

        assert_eq!(state.backtrace_len(), 2);
        assert_eq!(state.pending(), Some(PendingTransfer::Throw(value(STACK_OVERFLOW))));
        let walker = hooks.walker_stack.load(Ordering::SeqCst);
        assert!(distance(walker, here) > 32 * 1024, "walker ran on the faulting stack");

        // Ordinary faults walk in place.
        let record = FaultRecord::new(FaultCode::INT_DIVIDE_BY_ZERO, Address::new(thread.registers().rip));
        raise(&subsystem, &state, &thread, &record);
        let walker = hooks.walker_stack.load(Ordering::SeqCst);
        assert!(distance(walker, here) < 32 * 1024);

        fiber::uninstall();
        assert!(!fiber::is_installed());
    })
    .join()
    .unwrap();
}

#[test]
fn test_stack_overflow_without_fiber_records_nothing()
{
    let fx = fixture();
    let subsystem = Arc::clone(&fx.subsystem);

    let (len, pending) = thread::spawn(move || {
        assert!(!fiber::is_installed());
        let state = ThreadState::new(ThreadId(8));
        let thread = SimulatedThread::new();
        let record = FaultRecord::new(FaultCode::STACK_OVERFLOW, Address::new(thread.registers().rip));
        raise(&subsystem, &state, &thread, &record);
        (state.backtrace_len(), state.pending())
    })
    .join()
    .unwrap();

    assert_eq!(len, 0);
    assert_eq!(pending, Some(PendingTransfer::Throw(value(STACK_OVERFLOW))));
    assert_eq!(fx.hooks.backtraces.load(Ordering::SeqCst), 0);
}

#[test]
fn test_secondary_stack_survives_repeated_use()
{
    let fx = fixture();
    let subsystem = Arc::clone(&fx.subsystem);

    thread::spawn(move || {
        let state = Arc::new(ThreadState::new(ThreadId(9)));
        subsystem.install_thread_handler(Arc::clone(&state));
        let thread = SimulatedThread::new();
        for _ in 0..50 {
            let record = FaultRecord::new(FaultCode::STACK_OVERFLOW, Address::new(thread.registers().rip));
            raise(&subsystem, &state, &thread, &record);
            assert_eq!(state.backtrace_len(), 2);
            assert!(state.take_pending().is_some());
        }
    })
    .join()
    .unwrap();

    assert_eq!(fx.hooks.backtraces.load(Ordering::SeqCst), 50);
}

#[test]
fn test_redirect_requires_writable_context()
{
    let fx = fixture();
    let state = ThreadState::new(ThreadId(1));
    let thread = SimulatedThread::new();
    let before = thread.registers();

    thread.suspend().unwrap();
    thread
        .with_context(ContextAccess::Read, &mut |ctx| unsafe {
            fx.subsystem.redirect(&state, Some(value(DIVIDE_ERROR)), ctx);
        })
        .unwrap();
    thread.resume().unwrap();

    assert_eq!(thread.registers(), before);
    assert_eq!(thread.context_write_count(), 0);
}
