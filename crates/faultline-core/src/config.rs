//! # Configuration
//!
//! Tunables for the signal subsystem and the sampling profiler.
//!
//! Every field has a default; [`SignalConfig::from_env`] overrides them from
//! `FAULTLINE_*` environment variables:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `FAULTLINE_PROFILE_NSEC` | `nsec_per_sample` | 1 000 000 (1 ms) |
//! | `FAULTLINE_PROFILE_CAPACITY` | `profile_capacity` | 1 048 576 words |
//! | `FAULTLINE_PROFILE_MAX_FRAMES` | `max_frames_per_sample` | 256 |
//! | `FAULTLINE_EXIT_ON_SIGINT` | `exit_on_sigint` | `false` |
//! | `FAULTLINE_IGNORE_SIGINT` | `ignore_sigint` | `false` |
//! | `FAULTLINE_FORCE_QUIET_MS` | `force_quiet_period` | 500 ms |
//! | `FAULTLINE_SECONDARY_STACK` | `secondary_stack_size` | 131 072 bytes |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{FaultlineError, FaultlineResult};
use crate::profiler::ring::SAMPLE_OVERHEAD;

/// Size of the independent stack used to collect stack-overflow backtraces.
pub const DEFAULT_SECONDARY_STACK_SIZE: usize = 128 * 1024;

/// Smallest secondary stack we accept; the backtrace walker needs room to run.
pub const MIN_SECONDARY_STACK_SIZE: usize = 16 * 1024;

/// Runtime configuration for [`crate::SignalSubsystem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalConfig
{
    /// Sampling interval of the profiler in nanoseconds.
    pub nsec_per_sample: u64,
    /// Capacity of the profile ring buffer, in machine words.
    pub profile_capacity: usize,
    /// Upper bound on frames recorded for a single sample.
    pub max_frames_per_sample: usize,
    /// Exit with `128 + signal` on a console interrupt instead of delivering it.
    pub exit_on_sigint: bool,
    /// Drop console interrupts entirely.
    pub ignore_sigint: bool,
    /// After a forced interrupt, further interrupts inside this window are dropped.
    pub force_quiet_period: Duration,
    /// Size in bytes of each thread's secondary backtrace stack.
    pub secondary_stack_size: usize,
}

impl Default for SignalConfig
{
    fn default() -> Self
    {
        Self {
            nsec_per_sample: 1_000_000,
            profile_capacity: 1 << 20,
            max_frames_per_sample: 256,
            exit_on_sigint: false,
            ignore_sigint: false,
            force_quiet_period: Duration::from_millis(500),
            secondary_stack_size: DEFAULT_SECONDARY_STACK_SIZE,
        }
    }
}

impl SignalConfig
{
    /// Build a configuration from the defaults overridden by `FAULTLINE_*` variables.
    ///
    /// ## Errors
    ///
    /// `InvalidConfig` if a variable is set but doesn't parse, or if the
    /// resulting configuration fails [`SignalConfig::validate`].
    pub fn from_env() -> FaultlineResult<Self>
    {
        let mut config = Self::default();

        if let Some(nsec) = read_var::<u64>("FAULTLINE_PROFILE_NSEC")? {
            config.nsec_per_sample = nsec;
        }
        if let Some(capacity) = read_var::<usize>("FAULTLINE_PROFILE_CAPACITY")? {
            config.profile_capacity = capacity;
        }
        if let Some(frames) = read_var::<usize>("FAULTLINE_PROFILE_MAX_FRAMES")? {
            config.max_frames_per_sample = frames;
        }
        if let Some(flag) = read_flag("FAULTLINE_EXIT_ON_SIGINT")? {
            config.exit_on_sigint = flag;
        }
        if let Some(flag) = read_flag("FAULTLINE_IGNORE_SIGINT")? {
            config.ignore_sigint = flag;
        }
        if let Some(ms) = read_var::<u64>("FAULTLINE_FORCE_QUIET_MS")? {
            config.force_quiet_period = Duration::from_millis(ms);
        }
        if let Some(bytes) = read_var::<usize>("FAULTLINE_SECONDARY_STACK")? {
            config.secondary_stack_size = bytes;
        }

        config.validate()?;
        tracing::debug!(?config, "loaded signal configuration");
        Ok(config)
    }

    /// Check the invariants the subsystem relies on.
    ///
    /// ## Errors
    ///
    /// - `InvalidConfig` for a zero capacity or frame limit
    /// - `InvalidConfig` when the buffer cannot hold one full-size sample
    /// - `InvalidConfig` for a secondary stack under 16 KiB
    pub fn validate(&self) -> FaultlineResult<()>
    {
        if self.max_frames_per_sample == 0 {
            return Err(invalid("FAULTLINE_PROFILE_MAX_FRAMES", "must be at least 1"));
        }
        let one_sample = self.max_frames_per_sample + SAMPLE_OVERHEAD;
        if self.profile_capacity < one_sample {
            return Err(invalid(
                "FAULTLINE_PROFILE_CAPACITY",
                format!("must hold at least one full sample ({one_sample} words)"),
            ));
        }
        if self.secondary_stack_size < MIN_SECONDARY_STACK_SIZE {
            return Err(invalid(
                "FAULTLINE_SECONDARY_STACK",
                format!("must be at least {MIN_SECONDARY_STACK_SIZE} bytes"),
            ));
        }
        Ok(())
    }

    /// Sleep interval of the profiler thread, never below one millisecond.
    pub fn sample_interval(&self) -> Duration
    {
        let ms = self.nsec_per_sample / 1_000_000;
        Duration::from_millis(ms.max(1))
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> FaultlineError
{
    FaultlineError::InvalidConfig {
        key,
        reason: reason.into(),
    }
}

fn read_var<T>(key: &'static str) -> FaultlineResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, format!("{raw:?}: {e}"))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(invalid(key, "not valid unicode")),
    }
}

fn read_flag(key: &'static str) -> FaultlineResult<Option<bool>>
{
    let Some(raw) = read_var::<String>(key)? else {
        return Ok(None);
    };
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(invalid(key, format!("{raw:?} is not a boolean"))),
    }
}
