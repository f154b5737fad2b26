//! Tests for the sampling profiler and its ring buffer

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::*;
use faultline_core::error::FaultlineError;
use faultline_core::platform::simulated::SimulatedThread;
use faultline_core::platform::{ContextAccess, ThreadControl};
use faultline_core::profiler::ring::{ProfileRingBuffer, SampleMetadata, SAMPLE_OVERHEAD};
use faultline_core::profiler::timer::TimerResolution;
use faultline_core::types::RegisterContext;
use faultline_core::{
    ConsoleEvent, FaultlineResult, Profiler, ProfilerError, SignalConfig, ThreadId, ThreadState,
};

#[derive(Debug, Default)]
struct TimerCounts
{
    begins: AtomicUsize,
    ends: AtomicUsize,
}

struct CountingTimer
{
    counts: Arc<TimerCounts>,
    min_period: Option<u32>,
}

impl TimerResolution for CountingTimer
{
    fn min_period(&self) -> Option<u32>
    {
        self.min_period
    }

    fn begin_period(&self, period_ms: u32) -> bool
    {
        assert_eq!(period_ms, 1);
        self.counts.begins.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn end_period(&self, period_ms: u32)
    {
        assert_eq!(period_ms, 1);
        self.counts.ends.fetch_add(1, Ordering::SeqCst);
    }
}

fn counting_timer() -> (Box<dyn TimerResolution>, Arc<TimerCounts>)
{
    let counts = Arc::new(TimerCounts::default());
    let timer = CountingTimer {
        counts: Arc::clone(&counts),
        min_period: Some(1),
    };
    (Box::new(timer), counts)
}

/// Simulated thread that remembers how many callers had it stopped at once
#[derive(Default)]
struct DepthTrackingThread
{
    inner: SimulatedThread,
    depth: AtomicUsize,
    max_depth: AtomicUsize,
}

impl ThreadControl for DepthTrackingThread
{
    fn suspend(&self) -> FaultlineResult<()>
    {
        self.inner.suspend()?;
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_depth.fetch_max(depth, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> FaultlineResult<()>
    {
        self.depth.fetch_sub(1, Ordering::SeqCst);
        self.inner.resume()
    }

    fn with_context(
        &self,
        access: ContextAccess,
        f: &mut dyn FnMut(&mut dyn RegisterContext),
    ) -> FaultlineResult<()>
    {
        self.inner.with_context(access, f)
    }
}

fn fast_config(capacity: usize, max_frames: usize) -> SignalConfig
{
    SignalConfig {
        nsec_per_sample: 1_000_000,
        profile_capacity: capacity,
        max_frames_per_sample: max_frames,
        ..SignalConfig::default()
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

#[test]
fn test_start_without_main_thread()
{
    let fx = fixture();
    let (timer, counts) = counting_timer();
    let profiler = Profiler::with_timer(Arc::clone(&fx.subsystem), timer);

    assert_eq!(profiler.start(), Err(ProfilerError::NoTargetThread));
    assert_eq!(profiler.start_timer(), -4);
    assert!(!profiler.is_running());
    assert_eq!(counts.begins.load(Ordering::SeqCst), 0);
}

#[test]
fn test_timer_resolution_failure()
{
    let fx = fixture();
    attach_main(&fx.subsystem);
    let counts = Arc::new(TimerCounts::default());
    let timer = CountingTimer {
        counts: Arc::clone(&counts),
        min_period: None,
    };
    let profiler = Profiler::with_timer(Arc::clone(&fx.subsystem), Box::new(timer));

    assert_eq!(profiler.start(), Err(ProfilerError::TimerResolution));
    assert_eq!(profiler.start_timer(), -2);
    assert!(!profiler.is_running());
}

#[test]
fn test_profiler_collects_samples()
{
    let fx = fixture_with(MockRuntime::default(), fast_config(4096, 16));
    let (state, thread) = attach_main(&fx.subsystem);
    state.set_current_task(0x77);
    state.set_sleep_check_state(2);

    let stop = Arc::new(AtomicBool::new(false));
    let busy = {
        let stop = Arc::clone(&stop);
        let thread = Arc::clone(&thread);
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                thread.step();
                thread::yield_now();
            }
        })
    };

    let (timer, counts) = counting_timer();
    let profiler = Profiler::with_timer(Arc::clone(&fx.subsystem), timer);
    assert_eq!(profiler.start_timer(), 0);
    assert!(profiler.is_running());

    let sampled = wait_until(|| fx.subsystem.lock_profile().sample_count() >= 3);
    profiler.stop();
    drop(profiler);
    stop.store(true, Ordering::Relaxed);
    busy.join().unwrap();

    assert!(sampled, "no samples within two seconds");
    assert_eq!(counts.begins.load(Ordering::SeqCst), 1);
    assert_eq!(counts.ends.load(Ordering::SeqCst), 1);
    assert_eq!(thread.suspend_count(), thread.resume_count());
    assert!(!thread.is_suspended());

    let ring = fx.subsystem.lock_profile();
    let words = ring.as_words();
    assert_eq!(&words[words.len() - 2..], &[0, 0]);
    for sample in ring.samples() {
        assert_eq!(sample.frames.len(), 2);
        assert_eq!(sample.frames[1], thread.registers().rsp as usize);
        assert_eq!(sample.metadata.thread_id, 0);
        assert_eq!(sample.metadata.task, 0x77);
        assert_eq!(sample.metadata.sleep_state, 2);
    }
    let clocks: Vec<u64> = ring.samples().map(|s| s.metadata.cycle_clock).collect();
    assert!(clocks.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_full_buffer_stops_sampling()
{
    let max_frames = 4;
    let fx = fixture_with(MockRuntime::default(), fast_config(max_frames + SAMPLE_OVERHEAD, max_frames));
    attach_main(&fx.subsystem);

    let (timer, counts) = counting_timer();
    let profiler = Profiler::with_timer(Arc::clone(&fx.subsystem), timer);
    profiler.start().unwrap();

    assert!(wait_until(|| !profiler.is_running()), "profiler kept running on a full buffer");
    assert_eq!(fx.subsystem.lock_profile().sample_count(), 1);
    assert_eq!(counts.begins.load(Ordering::SeqCst), 1);
    assert_eq!(counts.ends.load(Ordering::SeqCst), 1);

    // A stop after the thread stopped itself releases nothing twice.
    profiler.stop();
    assert_eq!(counts.ends.load(Ordering::SeqCst), 1);
}

#[test]
fn test_timer_period_paired_across_restarts()
{
    let fx = fixture();
    attach_main(&fx.subsystem);
    let (timer, counts) = counting_timer();
    let profiler = Profiler::with_timer(Arc::clone(&fx.subsystem), timer);

    profiler.start().unwrap();
    profiler.start().unwrap();
    assert_eq!(counts.begins.load(Ordering::SeqCst), 1);

    profiler.stop();
    profiler.stop();
    assert_eq!(counts.ends.load(Ordering::SeqCst), 1);
    assert!(!profiler.is_running());

    profiler.start().unwrap();
    profiler.stop();
    drop(profiler);
    assert_eq!(counts.begins.load(Ordering::SeqCst), 2);
    assert_eq!(counts.ends.load(Ordering::SeqCst), 2);
}

#[test]
fn test_suspend_failure_ends_thread_and_restart_works()
{
    let fx = fixture_with(MockRuntime::default(), fast_config(4096, 8));
    let (_state, thread) = attach_main(&fx.subsystem);
    thread.fail_next_suspend();

    let (timer, counts) = counting_timer();
    let profiler = Profiler::with_timer(Arc::clone(&fx.subsystem), timer);
    profiler.start().unwrap();

    assert!(wait_until(|| !profiler.is_running()));
    assert!(fx
        .sink
        .contents()
        .contains("failed to suspend main thread. aborting profiling.\n"));
    assert_eq!(counts.ends.load(Ordering::SeqCst), 1);

    profiler.start().unwrap();
    assert!(wait_until(|| fx.subsystem.lock_profile().sample_count() >= 1));
    drop(profiler);
    assert_eq!(
        counts.begins.load(Ordering::SeqCst),
        counts.ends.load(Ordering::SeqCst)
    );
}

#[test]
fn test_context_failure_stops_sampling()
{
    let fx = fixture_with(MockRuntime::default(), fast_config(4096, 8));
    let (_state, thread) = attach_main(&fx.subsystem);
    thread.fail_next_get_context();

    let (timer, counts) = counting_timer();
    let profiler = Profiler::with_timer(Arc::clone(&fx.subsystem), timer);
    profiler.start().unwrap();

    assert!(wait_until(|| !profiler.is_running()));
    assert!(fx
        .sink
        .contents()
        .contains("failed to get context from main thread. aborting profiling.\n"));
    assert_eq!(fx.subsystem.lock_profile().sample_count(), 0);
    assert_eq!(thread.suspend_count(), thread.resume_count());

    // The thread is parked, not gone; a restart resumes sampling.
    profiler.start().unwrap();
    assert!(wait_until(|| fx.subsystem.lock_profile().sample_count() >= 1));
    drop(profiler);
    assert_eq!(counts.begins.load(Ordering::SeqCst), 2);
    assert_eq!(counts.ends.load(Ordering::SeqCst), 2);
}

#[test]
fn test_ring_rejects_sample_that_may_not_fit()
{
    let mut ring = ProfileRingBuffer::new(20, 4);
    let meta = SampleMetadata {
        thread_id: 3,
        task: 9,
        cycle_clock: 100,
        sleep_state: 0,
    };

    assert_eq!(ring.record_sample(meta, |buf| {
        buf.copy_from_slice(&[1, 2, 3, 4]);
        4
    }).unwrap(), 4);
    assert!(!ring.is_full());
    assert_eq!(ring.record_sample(meta, |buf| {
        buf[..2].copy_from_slice(&[5, 6]);
        2
    }).unwrap(), 2);
    assert!(ring.is_full());

    let before = ring.as_words().to_vec();
    let mut called = false;
    let result = ring.record_sample(meta, |_| {
        called = true;
        0
    });
    assert!(matches!(result, Err(FaultlineError::ProfileBufferFull { capacity: 20 })));
    assert!(!called);
    assert_eq!(ring.as_words(), &before[..]);

    assert_eq!(
        &before[..10],
        &[1, 2, 3, 4, 4, 9, 100, 1, 0, 0]
    );
    let frames: Vec<&[usize]> = ring.samples().map(|s| s.frames).collect();
    assert_eq!(frames, vec![&[1, 2, 3, 4][..], &[5, 6][..]]);

    ring.clear();
    assert!(ring.is_empty());
    assert!(!ring.is_full());
}

#[test]
fn test_interrupt_delivery_never_overlaps_sampling()
{
    let fx = fixture_with(MockRuntime::default(), fast_config(1 << 16, 8));
    let state = Arc::new(ThreadState::new(ThreadId::MAIN));
    let thread = Arc::new(DepthTrackingThread::default());
    fx.subsystem
        .set_main_thread(Arc::clone(&state), Arc::clone(&thread) as Arc<dyn ThreadControl>)
        .unwrap();

    let (timer, _counts) = counting_timer();
    let profiler = Profiler::with_timer(Arc::clone(&fx.subsystem), timer);
    profiler.start().unwrap();

    let deadline = Instant::now() + Duration::from_millis(100);
    let mut interrupts = 0;
    while Instant::now() < deadline {
        fx.subsystem.handle_console_interrupt(ConsoleEvent::CtrlC);
        fx.subsystem.poll_interrupt(&state);
        interrupts += 1;
        thread::yield_now();
    }
    let sampled = wait_until(|| fx.subsystem.lock_profile().sample_count() >= 1);
    drop(profiler);

    assert!(sampled, "no samples while interrupts were firing");
    assert!(interrupts > 0);
    assert_eq!(thread.max_depth.load(Ordering::SeqCst), 1);
    assert_eq!(thread.depth.load(Ordering::SeqCst), 0);
    assert_eq!(thread.inner.suspend_count(), thread.inner.resume_count());
    assert!(!thread.inner.is_suspended());
}
