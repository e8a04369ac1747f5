//! # rdebug Utilities
//!
//! Shared helpers for the rdebug workspace. Today that is the `tracing`
//! setup used by the agent binary and by hosts embedding the engine.

pub mod logging;

pub use logging::{init_logging, init_logging_with_level, LogFormat, LogGuard, LogLevel, LoggingError};
pub use tracing::{debug, error, info, trace, warn};
