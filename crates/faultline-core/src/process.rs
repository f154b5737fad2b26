//! # Process-wide signal context
//!
//! [`SignalSubsystem`] owns every piece of state that the fault handlers, the
//! interrupt callback and the profiler share:
//!
//! - the runtime hooks and configuration
//! - the safepoint interrupt flags
//! - the main-thread handle (set once at startup)
//! - the profile ring buffer, whose mutex is the *profiling lock*
//! - the stack-walk lock and the secondary-backtrace lock
//! - the fatal reporter and the diagnostic sink
//!
//! It is built once with [`SignalSubsystemBuilder`] and then only read; the
//! OS callbacks in [`crate::platform::windows`] reach it through a single
//! process-wide `OnceLock`, everything else receives it by reference.
//!
//! ## Lock order
//!
//! `stackwalk_lock` before `profile`. The secondary-backtrace lock is only
//! taken by a faulting thread on itself and never together with the others.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::config::SignalConfig;
use crate::error::{FaultlineError, FaultlineResult};
use crate::fiber;
use crate::platform::ThreadControl;
use crate::profiler::ring::ProfileRingBuffer;
use crate::report::{DiagnosticSink, FatalReporter, StderrSink};
use crate::runtime::RuntimeHooks;
use crate::safepoint::SafepointState;
use crate::types::{ThreadId, ThreadState};

/// The designated thread that receives interrupts and is profiled
#[derive(Clone)]
pub struct MainThread
{
    /// Runtime state of the thread
    pub state: Arc<ThreadState>,
    /// OS handle used to suspend and rewrite it
    pub control: Arc<dyn ThreadControl>,
}

impl fmt::Debug for MainThread
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("MainThread").field("state", &self.state).finish_non_exhaustive()
    }
}

thread_local! {
    static CURRENT_THREAD: RefCell<Option<Arc<ThreadState>>> = const { RefCell::new(None) };
}

/// Runtime state registered for the calling thread by
/// [`SignalSubsystem::install_thread_handler`].
pub fn current_thread() -> Option<Arc<ThreadState>>
{
    CURRENT_THREAD
        .try_with(|slot| slot.try_borrow().ok().and_then(|s| s.clone()))
        .ok()
        .flatten()
}

/// Process-wide context of the signal subsystem
pub struct SignalSubsystem
{
    config: SignalConfig,
    hooks: Arc<dyn RuntimeHooks>,
    sink: Arc<dyn DiagnosticSink>,
    safepoint: SafepointState,
    main: OnceLock<MainThread>,
    profile: Mutex<ProfileRingBuffer>,
    stackwalk: Mutex<()>,
    backtrace_lock: spin::Mutex<()>,
    reporter: FatalReporter,
}

impl fmt::Debug for SignalSubsystem
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("SignalSubsystem")
            .field("config", &self.config)
            .field("safepoint", &self.safepoint)
            .field("main", &self.main.get())
            .finish_non_exhaustive()
    }
}

impl SignalSubsystem
{
    /// Start building a subsystem around the runtime's hooks.
    pub fn builder(hooks: Arc<dyn RuntimeHooks>) -> SignalSubsystemBuilder
    {
        SignalSubsystemBuilder {
            hooks,
            config: SignalConfig::default(),
            sink: None,
        }
    }

    /// Configuration the subsystem was built with.
    pub fn config(&self) -> &SignalConfig
    {
        &self.config
    }

    /// The runtime's hooks.
    pub fn hooks(&self) -> &dyn RuntimeHooks
    {
        &*self.hooks
    }

    /// Where signal-context diagnostics go.
    pub fn sink(&self) -> &dyn DiagnosticSink
    {
        &*self.sink
    }

    /// Interrupt flags.
    pub fn safepoint(&self) -> &SafepointState
    {
        &self.safepoint
    }

    pub(crate) fn reporter(&self) -> &FatalReporter
    {
        &self.reporter
    }

    pub(crate) fn backtrace_lock(&self) -> &spin::Mutex<()>
    {
        &self.backtrace_lock
    }

    /// Register the thread that receives interrupts and is profiled.
    ///
    /// ## Errors
    ///
    /// - `InvalidConfig` if `state` is not thread 0
    /// - `MainThreadAlreadySet` on a second call
    pub fn set_main_thread(&self, state: Arc<ThreadState>, control: Arc<dyn ThreadControl>) -> FaultlineResult<()>
    {
        if state.tid() != ThreadId::MAIN {
            return Err(FaultlineError::InvalidConfig {
                key: "main thread",
                reason: format!("expected thread 0, got {}", state.tid()),
            });
        }
        self.main
            .set(MainThread { state, control })
            .map_err(|_| FaultlineError::MainThreadAlreadySet)?;
        tracing::debug!("registered main thread");
        Ok(())
    }

    /// The registered main thread.
    pub fn main_thread(&self) -> Option<&MainThread>
    {
        self.main.get()
    }

    /// Per-thread setup: remember `state` as the calling thread's runtime
    /// state and give the thread its secondary backtrace stack.
    ///
    /// Must be called once on every runtime thread before it can fault.
    pub fn install_thread_handler(&self, state: Arc<ThreadState>)
    {
        let tid = state.tid();
        CURRENT_THREAD.with(|slot| *slot.borrow_mut() = Some(state));
        fiber::install(self.config.secondary_stack_size);
        tracing::debug!(%tid, "installed thread signal handler");
    }

    /// Acquire the profiling lock, which also guards the ring buffer.
    pub fn lock_profile(&self) -> MutexGuard<'_, ProfileRingBuffer>
    {
        self.profile.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the stack-walk lock.
    pub fn lock_stackwalk(&self) -> MutexGuard<'_, ()>
    {
        self.stackwalk.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ignore console interrupts from now on (or stop ignoring them).
    pub fn set_ignore_sigint(&self, ignore: bool)
    {
        self.safepoint.set_ignore_sigint(ignore);
    }

    /// Make console interrupts terminate the process (or stop doing so).
    pub fn set_exit_on_sigint(&self, exit: bool)
    {
        self.safepoint.set_exit_on_sigint(exit);
    }
}

/// Builder for [`SignalSubsystem`]
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use faultline_core::{SignalConfig, SignalSubsystem, RuntimeHooks};
/// # fn build(hooks: Arc<dyn RuntimeHooks>) -> faultline_core::FaultlineResult<()> {
/// let subsystem = SignalSubsystem::builder(hooks)
///     .config(SignalConfig::from_env()?)
///     .build()?;
/// # Ok(()) }
/// ```
pub struct SignalSubsystemBuilder
{
    hooks: Arc<dyn RuntimeHooks>,
    config: SignalConfig,
    sink: Option<Arc<dyn DiagnosticSink>>,
}

impl SignalSubsystemBuilder
{
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: SignalConfig) -> Self
    {
        self.config = config;
        self
    }

    /// Send signal-context diagnostics to `sink` instead of standard error.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self
    {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration and allocate the profile buffer.
    ///
    /// ## Errors
    ///
    /// `InvalidConfig` if [`SignalConfig::validate`] fails.
    pub fn build(self) -> FaultlineResult<SignalSubsystem>
    {
        self.config.validate()?;
        let profile = ProfileRingBuffer::new(self.config.profile_capacity, self.config.max_frames_per_sample);
        Ok(SignalSubsystem {
            safepoint: SafepointState::new(self.config.exit_on_sigint, self.config.ignore_sigint),
            hooks: self.hooks,
            sink: self.sink.unwrap_or_else(|| Arc::new(StderrSink)),
            main: OnceLock::new(),
            profile: Mutex::new(profile),
            stackwalk: Mutex::new(()),
            backtrace_lock: spin::Mutex::new(()),
            reporter: FatalReporter::new(),
            config: self.config,
        })
    }
}
