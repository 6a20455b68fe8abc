//! Core functionality for the logger.
//!
//! This module contains:
//! - Window accumulation and averaging of samples
//! - The polling loop tying the reader, sensors and store together
//! - Summary statistics over stored windows

pub mod daemon;
pub mod summary;
pub mod windowing;

// Re-export commonly used types
pub use daemon::{Cycle, Logger, LoggerError, PollEvent, WindowSink};
pub use summary::{summarize, FieldSummary};
pub use windowing::{Flush, WindowAccumulator, WindowResult};
