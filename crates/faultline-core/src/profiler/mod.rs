//! # Sampling profiler
//!
//! A dedicated thread that periodically suspends the main thread, records one
//! backtrace into the [`ProfileRingBuffer`], and resumes it.
//!
//! ## Loop
//!
//! ```text
//!   sleep(interval)
//!   running?  ── no ──▶ park until start()
//!   buffer full? ── yes ──▶ stop timer, park
//!   lock stackwalk, lock profile
//!   suspend main ── fail ──▶ print, thread exits
//!   read context, record sample ── fail ──▶ print, stop timer
//!   resume main ── fail ──▶ print, abort
//!   unlock
//! ```
//!
//! Nothing between suspend and resume allocates or logs; failures there are
//! written to the subsystem's diagnostic sink.
//!
//! ## Start / stop
//!
//! [`Profiler::start`] creates the thread on first use and wakes it on later
//! calls. The system timer period is requested on every stopped → running
//! transition and released on every running → stopped transition, so the
//! two are always paired no matter how often start and stop are called or
//! whether the thread stopped itself.

pub mod ring;
pub mod timer;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use self::ring::SampleMetadata;
use self::timer::TimerResolution;
use crate::platform::guards::ThreadSuspendGuard;
use crate::platform::{self, ContextAccess};
use crate::process::SignalSubsystem;

/// Name of the sampling thread.
pub const PROFILER_THREAD_NAME: &str = "faultline-profiler";

/// Why the profiler could not be started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProfilerError
{
    /// The sampling thread could not be spawned
    #[error("failed to create the profiler thread")]
    CreateThread,

    /// The system timer capabilities could not be queried
    #[error("failed to get timer resolution")]
    TimerResolution,

    /// The sampling thread died and cannot be woken
    #[error("failed to resume profiling thread")]
    ResumeThread,

    /// No main thread has been registered to sample
    #[error("no main thread registered to profile")]
    NoTargetThread,
}

impl ProfilerError
{
    /// Status code of the start entry point. Success is `0`.
    pub const fn status_code(self) -> i32
    {
        match self {
            ProfilerError::CreateThread => -1,
            ProfilerError::TimerResolution => -2,
            ProfilerError::ResumeThread => -3,
            ProfilerError::NoTargetThread => -4,
        }
    }
}

/// Monotonic cycle counter stored with each sample.
pub fn cycleclock() -> u64
{
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: `rdtsc` has no preconditions on x86_64.
        unsafe { core::arch::x86_64::_rdtsc() }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        use std::sync::OnceLock;
        use std::time::Instant;

        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

/// Outcome of one wake-up of the sampling thread
enum Step
{
    Sampled,
    Full,
    Stopped,
    Exit,
}

struct Shared
{
    subsystem: Arc<SignalSubsystem>,
    timer: Box<dyn TimerResolution>,
    running: AtomicBool,
    shutdown: AtomicBool,
    /// Set by the sampling thread once it has left its loop for good.
    exited: AtomicBool,
    /// Smallest timer period, queried once; 0 until known.
    min_period: AtomicU32,
    /// Timer period currently held; 0 when none. Transitions happen under this lock.
    held_period: Mutex<u32>,
}

impl Shared
{
    fn held_period(&self) -> MutexGuard<'_, u32>
    {
        self.held_period.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self)
    {
        let mut held = self.held_period();
        if !self.running.load(Ordering::Acquire) {
            let period = self.min_period.load(Ordering::Acquire);
            *held = if period != 0 && self.timer.begin_period(period) { period } else { 0 };
        }
        self.running.store(true, Ordering::Release);
    }

    fn stop(&self)
    {
        let mut held = self.held_period();
        if self.running.load(Ordering::Acquire) && *held != 0 {
            self.timer.end_period(*held);
        }
        *held = 0;
        self.running.store(false, Ordering::Release);
    }

    fn sample_once(&self) -> Step
    {
        let subsystem = &*self.subsystem;
        let Some(main) = subsystem.main_thread() else {
            return Step::Exit;
        };
        let sink = subsystem.sink();
        let hooks = subsystem.hooks();

        let _walk = subsystem.lock_stackwalk();
        let mut ring = subsystem.lock_profile();
        if ring.is_full() {
            return Step::Full;
        }

        let Ok(guard) = ThreadSuspendGuard::new(&*main.control) else {
            sink.write_str("failed to suspend main thread. aborting profiling.\n");
            return Step::Exit;
        };

        let state = &*main.state;
        let metadata = SampleMetadata {
            thread_id: state.tid().raw(),
            task: state.current_task(),
            cycle_clock: cycleclock(),
            sleep_state: state.sleep_check_state(),
        };
        let mut recorded = true;
        let result = main.control.with_context(ContextAccess::Read, &mut |ctx| {
            recorded = ring
                .record_sample(metadata, |buffer| hooks.record_backtrace(&*ctx, buffer))
                .is_ok();
        });

        let step = if result.is_err() {
            sink.write_str("failed to get context from main thread. aborting profiling.\n");
            self.stop();
            Step::Stopped
        } else if recorded {
            Step::Sampled
        } else {
            Step::Full
        };

        if guard.resume().is_err() {
            self.stop();
            sink.write_str("failed to resume main thread! aborting.\n");
            hooks.abort();
        }
        step
    }
}

fn sampling_loop(shared: &Shared)
{
    platform::raise_current_thread_priority();
    let interval = shared.subsystem.config().sample_interval();
    tracing::debug!(?interval, "profiler thread started");

    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        if !shared.running.load(Ordering::Acquire) {
            thread::park();
            continue;
        }
        thread::sleep(interval);
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        if !shared.running.load(Ordering::Acquire) {
            continue;
        }
        match shared.sample_once() {
            Step::Sampled | Step::Stopped => {}
            Step::Full => {
                shared.stop();
                tracing::info!("profile buffer full, sampling stopped");
            }
            Step::Exit => break,
        }
    }

    shared.exited.store(true, Ordering::Release);
    shared.stop();
    tracing::debug!("profiler thread exited");
}

/// Handle to the sampling profiler of one [`SignalSubsystem`]
pub struct Profiler
{
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Profiler
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Profiler")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Profiler
{
    /// Profiler using the platform's system timer.
    pub fn new(subsystem: Arc<SignalSubsystem>) -> Self
    {
        Self::with_timer(subsystem, timer::system_timer())
    }

    /// Profiler using `timer` for timer-resolution requests.
    pub fn with_timer(subsystem: Arc<SignalSubsystem>, timer: Box<dyn TimerResolution>) -> Self
    {
        Self {
            shared: Arc::new(Shared {
                subsystem,
                timer,
                running: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                exited: AtomicBool::new(false),
                min_period: AtomicU32::new(0),
                held_period: Mutex::new(0),
            }),
            thread: Mutex::new(None),
        }
    }

    /// The subsystem being sampled.
    pub fn subsystem(&self) -> &Arc<SignalSubsystem>
    {
        &self.shared.subsystem
    }

    /// Whether samples are currently being taken.
    pub fn is_running(&self) -> bool
    {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Start (or restart) sampling.
    ///
    /// ## Errors
    ///
    /// - `NoTargetThread`: no main thread is registered
    /// - `TimerResolution`: the timer capabilities could not be queried
    /// - `CreateThread`: the sampling thread could not be spawned
    /// - `ResumeThread`: the sampling thread panicked earlier
    pub fn start(&self) -> Result<(), ProfilerError>
    {
        if self.shared.subsystem.main_thread().is_none() {
            return Err(ProfilerError::NoTargetThread);
        }

        let mut slot = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some(handle) if !handle.is_finished() && !self.shared.exited.load(Ordering::Acquire) => {
                *slot = Some(handle);
            }
            Some(handle) => {
                if handle.join().is_err() {
                    tracing::error!("profiler thread panicked");
                    return Err(ProfilerError::ResumeThread);
                }
                *slot = Some(self.spawn()?);
            }
            None => {
                let period = self.shared.timer.min_period().ok_or_else(|| {
                    tracing::error!("failed to get timer resolution");
                    ProfilerError::TimerResolution
                })?;
                self.shared.min_period.store(period, Ordering::Release);
                *slot = Some(self.spawn()?);
            }
        }

        self.shared.begin();
        if let Some(handle) = slot.as_ref() {
            handle.thread().unpark();
        }
        tracing::info!(interval = ?self.shared.subsystem.config().sample_interval(), "profiler started");
        Ok(())
    }

    /// [`Profiler::start`] as a status code: `0` on success, otherwise
    /// [`ProfilerError::status_code`].
    pub fn start_timer(&self) -> i32
    {
        match self.start() {
            Ok(()) => 0,
            Err(err) => err.status_code(),
        }
    }

    /// Stop sampling. The thread stays alive, parked, for the next start.
    pub fn stop(&self)
    {
        self.shared.stop();
        tracing::info!("profiler stopped");
    }

    fn spawn(&self) -> Result<JoinHandle<()>, ProfilerError>
    {
        self.shared.exited.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(PROFILER_THREAD_NAME.into())
            .spawn(move || sampling_loop(&shared))
            .map_err(|err| {
                tracing::error!(%err, "failed to spawn profiler thread");
                ProfilerError::CreateThread
            })
    }
}

impl Drop for Profiler
{
    fn drop(&mut self)
    {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.stop();
        let handle = self.thread.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}
