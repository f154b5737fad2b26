//! # System timer resolution
//!
//! The profiler sleeps between samples. On Windows the default scheduler tick
//! is around 15 ms, so a 1 ms sampling interval only works while the process
//! holds a finer timer period. [`TimerResolution`] abstracts the
//! `timeGetDevCaps` / `timeBeginPeriod` / `timeEndPeriod` triple.
//!
//! Every successful `begin_period` must be matched by exactly one
//! `end_period` with the same value; the profiler tracks the active period
//! for that.

/// Control of the system timer period
pub trait TimerResolution: Send + Sync
{
    /// Smallest period the system timer supports, in milliseconds.
    ///
    /// `None` if the capabilities cannot be queried.
    fn min_period(&self) -> Option<u32>;

    /// Request a timer period of `period_ms`. Returns `false` if refused.
    fn begin_period(&self, period_ms: u32) -> bool;

    /// Release a period previously granted by [`TimerResolution::begin_period`].
    fn end_period(&self, period_ms: u32);
}

/// Timer that never changes anything, for platforms without a tunable tick
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTimer;

impl TimerResolution for NoopTimer
{
    fn min_period(&self) -> Option<u32>
    {
        Some(1)
    }

    fn begin_period(&self, _period_ms: u32) -> bool
    {
        true
    }

    fn end_period(&self, _period_ms: u32) {}
}

/// Timer backend for the current platform.
pub fn system_timer() -> Box<dyn TimerResolution>
{
    #[cfg(all(windows, any(target_arch = "x86_64", target_arch = "x86")))]
    {
        Box::new(crate::platform::windows::timer::MultimediaTimer)
    }
    #[cfg(not(all(windows, any(target_arch = "x86_64", target_arch = "x86"))))]
    {
        Box::new(NoopTimer)
    }
}
