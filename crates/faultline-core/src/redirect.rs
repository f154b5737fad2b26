//! # Control-flow redirection
//!
//! Rewrites a stopped thread's registers so that, when it resumes, it enters
//! the runtime's throw trampoline instead of re-executing the faulting
//! instruction.
//!
//! The rewritten frame looks like a call into the trampoline from a frame
//! whose return address is zero, which stops the trampoline's own unwinder at
//! a clean boundary:
//!
//! ```text
//!   before                         after
//!   ------                         -----
//!   sp ─▶ ...                      (sp & !15) ─▶ ...
//!                                  sp ─▶ 0            (one word below)
//!   ip = faulting instruction      ip = throw trampoline
//! ```
//!
//! So `sp % 16 == 16 - word_size` after redirection, exactly as on entry to
//! a function that was reached by `call`.

use crate::dispatch::Disposition;
use crate::exception::{ExceptionValue, PendingTransfer};
use crate::fiber;
use crate::process::SignalSubsystem;
use crate::types::context::store_word;
use crate::types::{RegisterContext, ThreadState};

impl SignalSubsystem
{
    /// Arrange for `thread` to resume in the throw trampoline.
    ///
    /// - If the thread has an active safe-restore marker, the marker is
    ///   cleared and the trampoline is told to unwind to it; `exception` is
    ///   ignored.
    /// - Otherwise the thread's backtrace is recorded from `context` (on the
    ///   secondary stack for the stack-overflow exception) and `exception` is
    ///   left as the thread's pending transfer.
    ///
    /// Never allocates and never takes a lock other than the secondary
    /// backtrace lock.
    ///
    /// # Safety
    ///
    /// `context` must describe `thread`, and that thread must be the caller or
    /// be suspended. Its stack pointer must point into the thread's mapped
    /// stack with at least one free word below the 16-byte aligned boundary.
    pub unsafe fn redirect(
        &self,
        thread: &ThreadState,
        exception: Option<ExceptionValue>,
        context: &mut dyn RegisterContext,
    ) -> Disposition
    {
        let hooks = self.hooks();

        if let Some(marker) = thread.take_safe_restore() {
            thread.set_pending(PendingTransfer::Restore(marker));
        } else if let Some(value) = exception {
            // SAFETY: the caller is `thread` or holds it suspended.
            let buffer = unsafe { thread.backtrace_buffer() };
            let recorded = if hooks.exceptions().is_stack_overflow(value) {
                fiber::collect_on_secondary_stack(self.backtrace_lock(), hooks, &*context, buffer).unwrap_or(0)
            } else {
                hooks.record_backtrace(&*context, buffer)
            };
            thread.set_backtrace_len(recorded);
            thread.set_pending(PendingTransfer::Throw(value));
        } else {
            thread.set_backtrace_len(0);
        }

        let word = context.word_size();
        let sp = context.stack_pointer().align_down(16) - word;
        // SAFETY: the caller guarantees this word is on the thread's stack.
        unsafe { store_word(sp, 0, word) };
        context.set_stack_pointer(sp);
        context.set_instruction_pointer(hooks.throw_trampoline());

        Disposition::ContinueExecution
    }
}
