//! # Logging Utilities
//!
//! Logging infrastructure for faultline using `tracing`.
//!
//! Console output goes to **standard error**, the same stream the fault
//! handlers write their signal-safe diagnostics to, so that log lines and
//! fault reports appear in the order they happened.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use faultline_utils::init_logging;
//!
//! // Keep the guard alive for the whole program so file output is flushed.
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("Application started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Level filter (e.g. `RUST_LOG=debug`, `RUST_LOG=faultline_core=trace`)
//! - `FAULTLINE_LOG_FORMAT`: `pretty` (default) or `json`
//! - `FAULTLINE_LOG_FILE`: Optional log file. A `{date}` placeholder is
//!   replaced by today's UTC date and the file is never rotated; without it
//!   the file rotates daily.
//!
//! Never call these macros from a fault handler: the subscriber's writer
//! takes locks the faulting thread may already hold.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Placeholder in `FAULTLINE_LOG_FILE` replaced by the current date.
pub const DATE_PLACEHOLDER: &str = "{date}";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    Pretty,
    /// JSON lines
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Keeps the background file writer alive; drop it last to flush.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// Initialize logging from the environment.
///
/// ## Errors
///
/// - `InvalidFormat`: `FAULTLINE_LOG_FORMAT` is set to an unknown value
/// - `InitializationFailed`: a global subscriber is already installed
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var("FAULTLINE_LOG_FORMAT") {
        Ok(raw) => raw.parse()?,
        Err(_) => LogFormat::Pretty,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));
    init_logging_internal(format, filter)
}

/// Initialize logging with an explicit level, ignoring `RUST_LOG`.
///
/// `FAULTLINE_LOG_FILE` is still honoured.
///
/// ## Errors
///
/// - `InitializationFailed`: a global subscriber is already installed
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_logging_internal(format, EnvFilter::new(Level::from(level).to_string()))
}

fn init_logging_internal(format: LogFormat, filter: EnvFilter) -> Result<LoggingGuard, LoggingError>
{
    let console = console_layer(format);
    let mut guard = LoggingGuard::default();

    let mut layers: Vec<BoxedLayer> = vec![console];
    if let Some(path) = env::var_os("FAULTLINE_LOG_FILE").map(PathBuf::from) {
        let (layer, worker) = file_layer(format, &path);
        layers.push(layer);
        guard._file = Some(worker);
    }

    Registry::default()
        .with(layers.with_filter(filter))
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;
    Ok(guard)
}

fn console_layer(format: LogFormat) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr);
    match format {
        LogFormat::Pretty => layer.with_ansi(true).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    }
}

fn file_layer(format: LogFormat, path: &Path) -> (BoxedLayer, WorkerGuard)
{
    let (non_blocking, worker) = tracing_appender::non_blocking(file_appender(path));
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(false)
        .with_writer(non_blocking);
    let layer = match format {
        LogFormat::Pretty => layer.boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    };
    (layer, worker)
}

fn file_appender(path: &Path) -> tracing_appender::rolling::RollingFileAppender
{
    let raw = path.to_string_lossy();
    if raw.contains(DATE_PLACEHOLDER) {
        let dated = PathBuf::from(expand_date(&raw));
        let (dir, name) = split_log_path(&dated);
        tracing_appender::rolling::never(dir, name)
    } else {
        let (dir, name) = split_log_path(path);
        tracing_appender::rolling::daily(dir, name)
    }
}

/// Replace [`DATE_PLACEHOLDER`] in `template` with today's UTC date.
pub fn expand_date(template: &str) -> String
{
    template.replace(DATE_PLACEHOLDER, &Utc::now().format("%Y-%m-%d").to_string())
}

fn split_log_path(path: &Path) -> (PathBuf, PathBuf)
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let name = path
        .file_name()
        .map_or_else(|| PathBuf::from("faultline.log"), PathBuf::from);
    (dir, name)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Unknown log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Unknown log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
