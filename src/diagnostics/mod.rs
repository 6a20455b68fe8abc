//! Diagnostics for the logging daemon.
//!
//! Counters describing what the daemon saw on the wire and what it stored,
//! so a long-running deployment can be checked without reading the log.

pub mod counters;

// Re-export commonly used types
pub use counters::{
    create_shared_log, create_shared_log_with_persistence, read_persisted, DiagnosticsLog,
    DiagnosticsStats, PersistedStats, SharedDiagnostics,
};
