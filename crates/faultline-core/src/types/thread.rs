//! # Per-thread runtime state
//!
//! Everything the fault handlers need to know about one runtime thread.
//!
//! A [`ThreadState`] is shared between the thread it describes and the
//! threads that act on it from outside (interrupt delivery, the profiler).
//! All fields are atomics so that a fault handler can read and write them
//! without taking locks, and so that another thread can read them while the
//! owner is suspended.
//!
//! The backtrace buffer is the exception: it is a plain word array written
//! either by the owning thread from its own fault handler, or by another
//! thread while the owner is suspended under the profiling lock. Those two
//! writers never overlap, which is what the `unsafe impl Sync` relies on.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use crate::exception::{ExceptionValue, PendingTransfer};

/// Capacity of each thread's backtrace buffer, in frames.
pub const MAX_BACKTRACE_FRAMES: usize = 4096;

/// Runtime thread identifier
///
/// Thread `0` is the main thread: the only one that receives console
/// interrupts and the one the profiler samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

impl ThreadId
{
    /// The main thread.
    pub const MAIN: Self = ThreadId(0);

    /// Get the raw identifier.
    pub const fn raw(self) -> u32
    {
        self.0
    }

    /// Whether this is the main thread.
    pub const fn is_main(self) -> bool
    {
        self.0 == 0
    }
}

impl From<u32> for ThreadId
{
    fn from(id: u32) -> Self
    {
        ThreadId(id)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "thread {}", self.0)
    }
}

const TRANSFER_NONE: u8 = 0;
const TRANSFER_THROW: u8 = 1;
const TRANSFER_RESTORE: u8 = 2;

/// Shared, lock-free state of one runtime thread.
pub struct ThreadState
{
    tid: ThreadId,
    defer_signal: AtomicU32,
    io_wait: AtomicBool,
    current_task: AtomicUsize,
    sleep_check_state: AtomicU8,
    needs_stack_guard_reset: AtomicBool,
    safe_restore: AtomicUsize,
    fatal_depth: AtomicU32,
    pending_kind: AtomicU8,
    pending_payload: AtomicUsize,
    backtrace: UnsafeCell<Box<[usize]>>,
    backtrace_len: AtomicUsize,
}

// SAFETY: every field except `backtrace` is atomic. `backtrace` is only
// written by the owning thread from its own fault handler, or by one other
// thread while the owner is suspended; see the module documentation.
unsafe impl Sync for ThreadState {}

impl fmt::Debug for ThreadState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ThreadState")
            .field("tid", &self.tid)
            .field("defer_signal", &self.defer_signal.load(Ordering::Relaxed))
            .field("io_wait", &self.io_wait.load(Ordering::Relaxed))
            .field("current_task", &self.current_task.load(Ordering::Relaxed))
            .field("safe_restore", &self.safe_restore.load(Ordering::Relaxed))
            .field("pending", &self.pending())
            .field("backtrace_len", &self.backtrace_len.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ThreadState
{
    /// Create the state for thread `tid` with an empty backtrace buffer.
    pub fn new(tid: ThreadId) -> Self
    {
        Self {
            tid,
            defer_signal: AtomicU32::new(0),
            io_wait: AtomicBool::new(false),
            current_task: AtomicUsize::new(0),
            sleep_check_state: AtomicU8::new(0),
            needs_stack_guard_reset: AtomicBool::new(false),
            safe_restore: AtomicUsize::new(0),
            fatal_depth: AtomicU32::new(0),
            pending_kind: AtomicU8::new(TRANSFER_NONE),
            pending_payload: AtomicUsize::new(0),
            backtrace: UnsafeCell::new(vec![0; MAX_BACKTRACE_FRAMES].into_boxed_slice()),
            backtrace_len: AtomicUsize::new(0),
        }
    }

    /// Runtime identifier of this thread.
    pub fn tid(&self) -> ThreadId
    {
        self.tid
    }

    // --- interrupt deferral -------------------------------------------------

    /// Enter a region where interrupts must not be thrown into this thread.
    ///
    /// Regions nest; the returned guard leaves the region when dropped.
    pub fn defer_signals(&self) -> DeferGuard<'_>
    {
        self.defer_signal.fetch_add(1, Ordering::SeqCst);
        DeferGuard { state: self }
    }

    /// Whether the thread is inside at least one deferral region.
    pub fn is_deferring(&self) -> bool
    {
        self.defer_signal.load(Ordering::SeqCst) != 0
    }

    /// Mark the thread as blocked waiting for I/O (or not).
    pub fn set_io_wait(&self, waiting: bool)
    {
        self.io_wait.store(waiting, Ordering::SeqCst);
    }

    /// Whether the thread is blocked in the event loop.
    pub fn is_io_wait(&self) -> bool
    {
        self.io_wait.load(Ordering::SeqCst)
    }

    // --- profiler metadata --------------------------------------------------

    /// Record the identifier of the task the thread is running.
    pub fn set_current_task(&self, task: usize)
    {
        self.current_task.store(task, Ordering::Relaxed);
    }

    /// Identifier of the task the thread is running.
    pub fn current_task(&self) -> usize
    {
        self.current_task.load(Ordering::Relaxed)
    }

    /// Record the scheduler's sleep state for this thread.
    pub fn set_sleep_check_state(&self, state: u8)
    {
        self.sleep_check_state.store(state, Ordering::Relaxed);
    }

    /// Scheduler sleep state for this thread.
    pub fn sleep_check_state(&self) -> u8
    {
        self.sleep_check_state.load(Ordering::Relaxed)
    }

    // --- stack guard --------------------------------------------------------

    pub(crate) fn request_stack_guard_reset(&self)
    {
        self.needs_stack_guard_reset.store(true, Ordering::SeqCst);
    }

    /// Whether a stack overflow left the guard page consumed.
    pub fn needs_stack_guard_reset(&self) -> bool
    {
        self.needs_stack_guard_reset.load(Ordering::SeqCst)
    }

    /// Clear the stack-guard flag, returning whether it was set.
    ///
    /// The runtime calls this once the stack has unwound past the overflow
    /// and then restores the guard page.
    pub fn take_stack_guard_reset(&self) -> bool
    {
        self.needs_stack_guard_reset.swap(false, Ordering::SeqCst)
    }

    // --- safe restore -------------------------------------------------------

    /// Arm a guarded probe: a fault inside it resumes at `marker` instead of throwing.
    ///
    /// `marker` is an opaque non-zero token understood by the runtime's
    /// unwinder (typically the address of a jump buffer).
    pub fn set_safe_restore(&self, marker: usize)
    {
        self.safe_restore.store(marker, Ordering::SeqCst);
    }

    /// Active safe-restore marker, if any.
    pub fn safe_restore(&self) -> Option<usize>
    {
        match self.safe_restore.load(Ordering::SeqCst) {
            0 => None,
            marker => Some(marker),
        }
    }

    /// Clear the safe-restore marker, returning it.
    pub fn take_safe_restore(&self) -> Option<usize>
    {
        match self.safe_restore.swap(0, Ordering::SeqCst) {
            0 => None,
            marker => Some(marker),
        }
    }

    // --- fatal reporting ----------------------------------------------------

    /// Bump the fatal-report depth, returning the previous depth.
    pub(crate) fn enter_fatal(&self) -> u32
    {
        self.fatal_depth.fetch_add(1, Ordering::SeqCst)
    }

    // --- pending transfer ---------------------------------------------------

    pub(crate) fn set_pending(&self, transfer: PendingTransfer)
    {
        let (kind, payload) = match transfer {
            PendingTransfer::Throw(value) => (TRANSFER_THROW, value.get()),
            PendingTransfer::Restore(marker) => (TRANSFER_RESTORE, marker),
        };
        self.pending_payload.store(payload, Ordering::SeqCst);
        self.pending_kind.store(kind, Ordering::SeqCst);
    }

    /// Transfer waiting for the throw trampoline, without clearing it.
    pub fn pending(&self) -> Option<PendingTransfer>
    {
        let kind = self.pending_kind.load(Ordering::SeqCst);
        decode_transfer(kind, self.pending_payload.load(Ordering::SeqCst))
    }

    /// Take the transfer left by the last redirection.
    ///
    /// Called by the throw trampoline on entry; afterwards the slot is empty
    /// again.
    pub fn take_pending(&self) -> Option<PendingTransfer>
    {
        let kind = self.pending_kind.swap(TRANSFER_NONE, Ordering::SeqCst);
        let payload = self.pending_payload.swap(0, Ordering::SeqCst);
        decode_transfer(kind, payload)
    }

    // --- backtrace buffer ---------------------------------------------------

    /// Mutable access to the full backtrace buffer.
    ///
    /// # Safety
    ///
    /// The caller must be the owning thread, or must hold the owning thread
    /// suspended, and no other reference from this method may be live.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn backtrace_buffer(&self) -> &mut [usize]
    {
        unsafe { &mut *self.backtrace.get() }
    }

    pub(crate) fn set_backtrace_len(&self, len: usize)
    {
        self.backtrace_len.store(len.min(MAX_BACKTRACE_FRAMES), Ordering::SeqCst);
    }

    /// Number of frames recorded by the last redirection.
    pub fn backtrace_len(&self) -> usize
    {
        self.backtrace_len.load(Ordering::SeqCst)
    }

    /// Copy out the frames recorded by the last redirection.
    ///
    /// # Safety
    ///
    /// Same contract as the writers: call it from the owning thread, or while
    /// the owning thread is suspended.
    pub unsafe fn backtrace(&self) -> Vec<usize>
    {
        let len = self.backtrace_len();
        unsafe { (&*self.backtrace.get())[..len].to_vec() }
    }
}

fn decode_transfer(kind: u8, payload: usize) -> Option<PendingTransfer>
{
    match kind {
        TRANSFER_THROW => ExceptionValue::new(payload).map(PendingTransfer::Throw),
        TRANSFER_RESTORE => Some(PendingTransfer::Restore(payload)),
        _ => None,
    }
}

/// Guard returned by [`ThreadState::defer_signals`]
#[derive(Debug)]
pub struct DeferGuard<'a>
{
    state: &'a ThreadState,
}

impl Drop for DeferGuard<'_>
{
    fn drop(&mut self)
    {
        self.state.defer_signal.fetch_sub(1, Ordering::SeqCst);
    }
}
