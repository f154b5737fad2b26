//! Multimedia timer resolution (`winmm`).

use std::mem::size_of;

use winapi::um::mmsystem::{TIMECAPS, TIMERR_NOERROR};
use winapi::um::timeapi::{timeBeginPeriod, timeEndPeriod, timeGetDevCaps};

use crate::profiler::timer::TimerResolution;

/// [`TimerResolution`] over `timeGetDevCaps` / `timeBeginPeriod` / `timeEndPeriod`
#[derive(Debug, Default, Clone, Copy)]
pub struct MultimediaTimer;

impl TimerResolution for MultimediaTimer
{
    fn min_period(&self) -> Option<u32>
    {
        let mut caps = TIMECAPS {
            wPeriodMin: 0,
            wPeriodMax: 0,
        };
        // SAFETY: `caps` is a valid TIMECAPS and the size passed matches it.
        let status = unsafe { timeGetDevCaps(&mut caps, size_of::<TIMECAPS>() as u32) };
        (status == TIMERR_NOERROR).then_some(caps.wPeriodMin)
    }

    fn begin_period(&self, period_ms: u32) -> bool
    {
        // SAFETY: plain value argument.
        unsafe { timeBeginPeriod(period_ms) == TIMERR_NOERROR }
    }

    fn end_period(&self, period_ms: u32)
    {
        // SAFETY: only called with a period previously granted by `begin_period`.
        unsafe { timeEndPeriod(period_ms) };
    }
}
