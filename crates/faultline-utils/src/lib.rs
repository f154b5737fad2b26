//! # faultline Utilities
//!
//! Shared helpers for the faultline workspace, currently the `tracing`
//! subscriber setup used by the `faultline` binary.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
