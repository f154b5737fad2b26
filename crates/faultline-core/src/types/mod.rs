//! # Types
//!
//! Platform-agnostic types used throughout the subsystem.
//!
//! These types abstract away Win32 details, allowing the dispatcher and the
//! interrupt protocol to work with concepts like "register context" and
//! "thread state" without knowing which backend produced them.

pub mod address;
pub mod context;
pub mod thread;

// Re-export all public types
pub use address::Address;
pub use context::{Architecture, RegisterContext, X86Registers, X86_64Registers};
pub use thread::{DeferGuard, ThreadId, ThreadState, MAX_BACKTRACE_FRAMES};
