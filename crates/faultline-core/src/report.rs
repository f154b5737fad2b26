//! # Diagnostics from signal context
//!
//! Fault handlers cannot use `tracing`, `eprintln!` or anything else that may
//! allocate or take a lock the faulting thread already holds. Everything they
//! print goes through a [`DiagnosticSink`], whose default implementation
//! writes straight to file descriptor 2.
//!
//! [`SinkWriter`] adapts a sink to [`fmt::Write`] so that `write!` can be used
//! for formatting; integer and string formatting through `core::fmt` does not
//! allocate.
//!
//! ## Fatal reports
//!
//! [`FatalReporter`] prints the bug-report banner for faults that cannot be
//! turned into exceptions. Reports from different threads are serialized by a
//! spin lock so that their lines never interleave. A thread that faults again
//! while producing its own report skips the report and asks for an immediate
//! hard exit. That holds whichever way it re-enters (structured exception or
//! CRT signal), and also for threads with no runtime state: the reporter
//! remembers which thread holds the output lock and never waits on itself.

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::fault::FaultRecord;
use crate::runtime::RuntimeHooks;
use crate::types::{RegisterContext, ThreadState};

/// Banner printed before every fatal fault report.
pub const BUG_REPORT_BANNER: &str = "\nPlease submit a bug report with steps to reproduce this fault, and any error \
                                     messages that follow (in their entirety). Thanks.\nException: ";

/// Reentrancy-safe output for diagnostics
pub trait DiagnosticSink: Send + Sync
{
    /// Write `text` as-is. Must not allocate or block on locks.
    fn write_str(&self, text: &str);
}

/// Sink writing to the process's standard error with a raw `write(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink
{
    fn write_str(&self, text: &str)
    {
        let mut bytes = text.as_bytes();
        while !bytes.is_empty() {
            // SAFETY: `bytes` is a valid slice for the length passed.
            let written = unsafe { libc::write(2, bytes.as_ptr().cast(), bytes.len() as _) };
            if written <= 0 {
                return;
            }
            bytes = &bytes[written as usize..];
        }
    }
}

/// [`fmt::Write`] adapter over a [`DiagnosticSink`]
pub struct SinkWriter<'a>
{
    sink: &'a dyn DiagnosticSink,
}

impl<'a> SinkWriter<'a>
{
    /// Wrap `sink`.
    pub fn new(sink: &'a dyn DiagnosticSink) -> Self
    {
        Self { sink }
    }
}

impl fmt::Write for SinkWriter<'_>
{
    fn write_str(&mut self, s: &str) -> fmt::Result
    {
        self.sink.write_str(s);
        Ok(())
    }
}

/// How a fatal fault ends the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination
{
    /// Orderly exit through the runtime, running its exit hooks
    Exit(i32),
    /// Immediate exit: no runtime code, no CRT `atexit` handlers
    HardExit(i32),
}

thread_local! {
    static REPORTER_TOKEN: u8 = const { 0 };
}

/// Identifies the calling thread while it holds the output lock.
fn reporter_token() -> usize
{
    REPORTER_TOKEN
        .try_with(|token| token as *const u8 as usize)
        .unwrap_or(usize::MAX)
}

/// Holds the output lock and the owner mark; clears the mark first on drop.
struct ReportGuard<'a>
{
    owner: &'a AtomicUsize,
    _output: spin::MutexGuard<'a, ()>,
}

impl Drop for ReportGuard<'_>
{
    fn drop(&mut self)
    {
        self.owner.store(0, Ordering::Release);
    }
}

/// Prints fatal fault reports, serialized across threads
#[derive(Debug, Default)]
pub struct FatalReporter
{
    output: spin::Mutex<()>,
    /// [`reporter_token`] of the thread holding `output`, 0 when free
    owner: AtomicUsize,
}

impl FatalReporter
{
    /// A reporter with no report in progress.
    pub const fn new() -> Self
    {
        Self {
            output: spin::Mutex::new(()),
            owner: AtomicUsize::new(0),
        }
    }

    /// Whether some thread is printing a report right now.
    pub fn is_reporting(&self) -> bool
    {
        self.output.is_locked()
    }

    /// Take the output lock, or `None` if the calling thread already holds it.
    fn acquire(&self) -> Option<ReportGuard<'_>>
    {
        let token = reporter_token();
        if self.owner.load(Ordering::Acquire) == token {
            return None;
        }
        let output = self.output.lock();
        self.owner.store(token, Ordering::Release);
        Some(ReportGuard {
            owner: &self.owner,
            _output: output,
        })
    }

    /// Report a fault that cannot be turned into an exception.
    ///
    /// The first report on a thread prints the banner, the code name, the
    /// faulting address with its best-effort symbol and the runtime's crash
    /// report, then asks for an orderly exit. Any later entry on the same
    /// thread means reporting itself faulted: nothing is printed and the
    /// caller is told to hard-exit.
    pub fn report(
        &self,
        thread: &ThreadState,
        record: &FaultRecord,
        context: &dyn RegisterContext,
        hooks: &dyn RuntimeHooks,
        sink: &dyn DiagnosticSink,
    ) -> Termination
    {
        if thread.enter_fatal() > 0 {
            return Termination::HardExit(1);
        }
        let Some(_serial) = self.acquire() else {
            return Termination::HardExit(1);
        };

        let mut out = SinkWriter::new(sink);
        if record.code == crate::fault::FaultCode::ILLEGAL_INSTRUCTION {
            let _ = out.write_str("\n");
            let _ = hooks.show_illegal_instruction(context, &mut out);
        }
        let _ = out.write_str(BUG_REPORT_BANNER);
        let _ = write!(out, "{} at 0x{:x} -- ", record.code.name(), record.address);
        let _ = hooks.symbolize(record.address, &mut out);
        let _ = out.write_str("\n");
        hooks.critical_error(0, context);

        Termination::Exit(1)
    }

    /// Report a fatal CRT signal (SIGSEGV, SIGILL, SIGTERM, SIGABRT).
    ///
    /// `thread` is the calling thread's runtime state, if it has one. Returns
    /// `None` once the report is printed; the caller then re-raises `signal`.
    /// Returns the termination to use instead when reporting itself faulted.
    pub fn report_signal(
        &self,
        thread: Option<&ThreadState>,
        signal: i32,
        context: &dyn RegisterContext,
        hooks: &dyn RuntimeHooks,
        sink: &dyn DiagnosticSink,
    ) -> Option<Termination>
    {
        if thread.is_some_and(|thread| thread.enter_fatal() > 0) {
            return Some(Termination::HardExit(1));
        }
        let Some(_serial) = self.acquire() else {
            return Some(Termination::HardExit(1));
        };

        let mut out = SinkWriter::new(sink);
        if signal == crate::signals::SIGILL {
            let _ = hooks.show_illegal_instruction(context, &mut out);
        }
        let _ = writeln!(
            out,
            "\nsignal ({signal}): {}",
            crate::signals::signal_name(signal)
        );
        hooks.critical_error(signal, context);
        None
    }
}
