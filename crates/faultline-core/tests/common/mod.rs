//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use faultline_core::platform::guards::ThreadSuspendGuard;
use faultline_core::platform::simulated::SimulatedThread;
use faultline_core::platform::{ContextAccess, ThreadControl};
use faultline_core::report::DiagnosticSink;
use faultline_core::{
    Address, Disposition, ExceptionTable, ExceptionValue, FaultRecord, RegisterContext, RuntimeHooks, SignalConfig,
    SignalSubsystem, ThreadId, ThreadState,
};

pub const TRAMPOLINE: u64 = 0x7000_0000_1000;
pub const SAFEPOINT_PAGE: u64 = 0x7000_1000_0000;

pub const DIVIDE_ERROR: usize = 0x10;
pub const STACK_OVERFLOW: usize = 0x20;
pub const READ_ONLY_MEMORY: usize = 0x30;
pub const INTERRUPT: usize = 0x40;

pub fn value(raw: usize) -> ExceptionValue
{
    ExceptionValue::new(raw).unwrap()
}

/// Sink that keeps everything written to it
#[derive(Debug, Default)]
pub struct CaptureSink
{
    text: Mutex<String>,
}

impl CaptureSink
{
    pub fn contents(&self) -> String
    {
        self.text.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize
    {
        self.contents().matches(needle).count()
    }
}

impl DiagnosticSink for CaptureSink
{
    fn write_str(&self, text: &str)
    {
        self.text.lock().unwrap().push_str(text);
    }
}

/// Runtime hooks that record what the subsystem asked of them
#[derive(Debug, Default)]
pub struct MockRuntime
{
    pub missing_exceptions: bool,
    pub backtraces: AtomicUsize,
    /// Address of a local inside the last `record_backtrace` call
    pub walker_stack: AtomicUsize,
    pub armed: AtomicUsize,
    pub disarmed: AtomicUsize,
    pub wakeups: AtomicUsize,
    pub gc_waits: AtomicUsize,
}

impl MockRuntime
{
    pub fn without_exceptions() -> Self
    {
        Self {
            missing_exceptions: true,
            ..Self::default()
        }
    }
}

impl RuntimeHooks for MockRuntime
{
    fn exceptions(&self) -> ExceptionTable
    {
        if self.missing_exceptions {
            return ExceptionTable::default();
        }
        ExceptionTable {
            divide_error: ExceptionValue::new(DIVIDE_ERROR),
            stack_overflow: ExceptionValue::new(STACK_OVERFLOW),
            read_only_memory: ExceptionValue::new(READ_ONLY_MEMORY),
            interrupt: ExceptionValue::new(INTERRUPT),
        }
    }

    fn throw_trampoline(&self) -> Address
    {
        Address::new(TRAMPOLINE)
    }

    fn record_backtrace(&self, context: &dyn RegisterContext, buffer: &mut [usize]) -> usize
    {
        let marker = 0u8;
        self.walker_stack
            .store(std::hint::black_box(&marker) as *const u8 as usize, Ordering::SeqCst);
        self.backtraces.fetch_add(1, Ordering::SeqCst);

        let frames = [
            context.instruction_pointer().value() as usize,
            context.stack_pointer().value() as usize,
        ];
        let n = frames.len().min(buffer.len());
        buffer[..n].copy_from_slice(&frames[..n]);
        n
    }

    fn is_safepoint_address(&self, address: Address) -> bool
    {
        address.value().wrapping_sub(SAFEPOINT_PAGE) < 0x1000
    }

    fn wait_for_gc(&self)
    {
        self.gc_waits.fetch_add(1, Ordering::SeqCst);
    }

    fn wake_event_loop(&self)
    {
        self.wakeups.fetch_add(1, Ordering::SeqCst);
    }

    fn arm_safepoint(&self)
    {
        self.armed.fetch_add(1, Ordering::SeqCst);
    }

    fn disarm_safepoint(&self)
    {
        self.disarmed.fetch_add(1, Ordering::SeqCst);
    }

    fn symbolize(&self, pc: Address, out: &mut dyn fmt::Write) -> fmt::Result
    {
        write!(out, "mock_function (ip: 0x{pc:x})")
    }

    fn throw(&self, value: ExceptionValue) -> !
    {
        panic!("throw {:#x}", value.get())
    }

    fn internal_error(&self, message: fmt::Arguments<'_>) -> !
    {
        panic!("internal error: {message}")
    }

    fn unwind_to_safe_restore(&self, marker: usize) -> !
    {
        panic!("unwind to {marker:#x}")
    }

    fn exit(&self, status: i32) -> !
    {
        panic!("exit {status}")
    }

    fn abort(&self) -> !
    {
        panic!("abort")
    }
}

pub struct Fixture
{
    pub subsystem: Arc<SignalSubsystem>,
    pub hooks: Arc<MockRuntime>,
    pub sink: Arc<CaptureSink>,
}

pub fn fixture() -> Fixture
{
    fixture_with(MockRuntime::default(), SignalConfig::default())
}

pub fn fixture_with(hooks: MockRuntime, config: SignalConfig) -> Fixture
{
    let hooks = Arc::new(hooks);
    let sink = Arc::new(CaptureSink::default());
    let subsystem = SignalSubsystem::builder(Arc::clone(&hooks) as Arc<dyn RuntimeHooks>)
        .config(config)
        .sink(Arc::clone(&sink) as Arc<dyn DiagnosticSink>)
        .build()
        .unwrap();
    Fixture {
        subsystem: Arc::new(subsystem),
        hooks,
        sink,
    }
}

/// Register a simulated main thread without touching the calling thread's state.
pub fn attach_main(subsystem: &SignalSubsystem) -> (Arc<ThreadState>, Arc<SimulatedThread>)
{
    let state = Arc::new(ThreadState::new(ThreadId::MAIN));
    let thread = Arc::new(SimulatedThread::new());
    subsystem
        .set_main_thread(Arc::clone(&state), Arc::clone(&thread) as Arc<dyn ThreadControl>)
        .unwrap();
    (state, thread)
}

/// Raise `record` on `thread` as if the OS had stopped it at the fault.
pub fn raise(
    subsystem: &SignalSubsystem,
    state: &ThreadState,
    thread: &SimulatedThread,
    record: &FaultRecord,
) -> Disposition
{
    let guard = ThreadSuspendGuard::new(thread).unwrap();
    let mut disposition = Disposition::ContinueSearch;
    thread
        .with_context(ContextAccess::ReadWrite, &mut |ctx| {
            disposition = unsafe { subsystem.handle_fault(state, record, ctx) };
        })
        .unwrap();
    guard.resume().unwrap();
    disposition
}
