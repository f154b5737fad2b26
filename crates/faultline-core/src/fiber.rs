//! # Secondary backtrace context
//!
//! A stack overflow leaves the faulting thread with only the few kilobytes the
//! OS reserves past the guard page, far too little for a stack walker. Each
//! runtime thread therefore owns a small coroutine with its own stack (128 KiB
//! by default) whose only job is to run the backtrace walker over the faulting
//! context.
//!
//! The coroutine is a [`generator`] that is resumed once at installation so it
//! sits parked at its first `yield_`. Every collection sends it one job and
//! receives the frame count back; it never finishes.
//!
//! ```text
//!   faulting thread                       secondary stack
//!   ---------------                       ---------------
//!   lock(backtrace_lock)
//!   send(job)  ───────────────────────▶   yield_ returns Some(job)
//!                                         hooks.record_backtrace(ctx, buf)
//!   send returns n  ◀─────────────────── yield_(n)
//!   unlock(backtrace_lock)
//! ```

use std::cell::RefCell;
use std::mem::size_of;

use generator::{Generator, Gn};

use crate::runtime::RuntimeHooks;
use crate::types::RegisterContext;

/// A type-erased collection job handed to the coroutine.
struct CollectJob
{
    run: unsafe fn(*mut ()) -> usize,
    data: *mut (),
}

// SAFETY: the job is only ever handed to the coroutine owned by the sending
// thread, and the sender blocks until the coroutine yields back.
unsafe impl Send for CollectJob {}

struct Request<'a>
{
    hooks: &'a dyn RuntimeHooks,
    context: &'a dyn RegisterContext,
    buffer: &'a mut [usize],
}

/// Runs on the secondary stack.
unsafe fn run_request(data: *mut ()) -> usize
{
    // SAFETY: `data` points at the `Request` on the sender's stack, which is
    // alive until `send` returns.
    let request = unsafe { &mut *data.cast::<Request<'_>>() };
    request.hooks.record_backtrace(request.context, request.buffer)
}

/// One thread's backtrace coroutine
pub struct BacktraceFiber
{
    generator: Generator<'static, CollectJob, usize>,
    stack_size: usize,
}

impl BacktraceFiber
{
    /// Allocate a coroutine with a `stack_size`-byte stack and park it at its entry point.
    pub fn new(stack_size: usize) -> Self
    {
        let words = stack_size / size_of::<usize>();
        let mut generator = Gn::<CollectJob>::new_scoped_opt(words, |mut scope| {
            let mut collected = 0;
            loop {
                match scope.yield_(collected) {
                    // SAFETY: see `run_request`.
                    Some(job) => collected = unsafe { (job.run)(job.data) },
                    None => return 0,
                }
            }
        });
        // Run up to the first yield so the next `send` delivers a job.
        let _ = generator.resume();
        Self { generator, stack_size }
    }

    /// Size of the coroutine's stack in bytes.
    pub fn stack_size(&self) -> usize
    {
        self.stack_size
    }

    fn collect(&mut self, hooks: &dyn RuntimeHooks, context: &dyn RegisterContext, buffer: &mut [usize]) -> usize
    {
        let mut request = Request {
            hooks,
            context,
            buffer,
        };
        let job = CollectJob {
            run: run_request,
            data: (&mut request as *mut Request<'_>).cast(),
        };
        self.generator.send(job)
    }
}

thread_local! {
    static BACKTRACE_FIBER: RefCell<Option<BacktraceFiber>> = const { RefCell::new(None) };
}

/// Give the current thread its backtrace coroutine. Idempotent.
pub fn install(stack_size: usize)
{
    BACKTRACE_FIBER.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(BacktraceFiber::new(stack_size));
            tracing::debug!(stack_size, "installed backtrace fiber");
        }
    });
}

/// Whether the current thread has a backtrace coroutine.
pub fn is_installed() -> bool
{
    BACKTRACE_FIBER
        .try_with(|slot| slot.try_borrow().map(|s| s.is_some()).unwrap_or(true))
        .unwrap_or(false)
}

/// Drop the current thread's coroutine.
pub fn uninstall()
{
    let _ = BACKTRACE_FIBER.try_with(|slot| slot.borrow_mut().take());
}

/// Walk `context` on the current thread's secondary stack.
///
/// Returns `None` when the thread has no coroutine (or is already inside one,
/// which only happens if the walker itself faulted).
pub(crate) fn collect_on_secondary_stack(
    lock: &spin::Mutex<()>,
    hooks: &dyn RuntimeHooks,
    context: &dyn RegisterContext,
    buffer: &mut [usize],
) -> Option<usize>
{
    BACKTRACE_FIBER
        .try_with(|slot| {
            let mut slot = slot.try_borrow_mut().ok()?;
            let fiber = slot.as_mut()?;
            let _serial = lock.lock();
            Some(fiber.collect(hooks, context, buffer))
        })
        .ok()
        .flatten()
}
