//! Run counters for the logging daemon.
//!
//! Tracks how many frames were decoded or dropped, how many bytes were
//! skipped while synchronizing and how many windows reached the store.
//! Counts are cumulative across runs when a persistence path is set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Counters for the current run.
#[derive(Debug)]
pub struct DiagnosticsLog {
    /// Frames that passed the checksum
    frames_decoded: AtomicU64,
    /// Frames dropped on checksum mismatch
    checksum_failures: AtomicU64,
    /// Bytes discarded while hunting for the sync pair
    sync_bytes_skipped: AtomicU64,
    /// Cycles where the temperature/humidity sensor had no data
    env_read_failures: AtomicU64,
    /// Windows written to the store
    windows_persisted: AtomicU64,
    /// Windows that elapsed without a frame
    empty_windows: AtomicU64,
    /// Identifier of this run
    run_id: Uuid,
    /// Run start time
    run_start: DateTime<Utc>,
    /// Path for persisting counters
    persist_path: Option<PathBuf>,
}

impl DiagnosticsLog {
    /// Create a new counter log.
    pub fn new() -> Self {
        Self {
            frames_decoded: AtomicU64::new(0),
            checksum_failures: AtomicU64::new(0),
            sync_bytes_skipped: AtomicU64::new(0),
            env_read_failures: AtomicU64::new(0),
            windows_persisted: AtomicU64::new(0),
            empty_windows: AtomicU64::new(0),
            run_id: Uuid::new_v4(),
            run_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a counter log that continues from, and saves to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            warn!("could not load previous diagnostics: {e}");
        }

        log
    }

    pub fn record_frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checksum_failure(&self) {
        self.checksum_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes skipped while synchronizing.
    pub fn record_sync_bytes_skipped(&self, count: u64) {
        self.sync_bytes_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_env_read_failure(&self) {
        self.env_read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_persisted(&self) {
        self.windows_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_window(&self) {
        self.empty_windows.fetch_add(1, Ordering::Relaxed);
    }

    /// Identifier of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Get the current counters.
    pub fn stats(&self) -> DiagnosticsStats {
        DiagnosticsStats {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            sync_bytes_skipped: self.sync_bytes_skipped.load(Ordering::Relaxed),
            env_read_failures: self.env_read_failures.load(Ordering::Relaxed),
            windows_persisted: self.windows_persisted.load(Ordering::Relaxed),
            empty_windows: self.empty_windows.load(Ordering::Relaxed),
            run_id: self.run_id,
            run_start: self.run_start,
            run_duration_secs: (Utc::now() - self.run_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Run Statistics ({}):\n\
             - Frames decoded: {}\n\
             - Checksum failures: {}\n\
             - Bytes skipped while syncing: {}\n\
             - Temperature/humidity misses: {}\n\
             - Windows persisted: {}\n\
             - Empty windows: {}\n\
             - Run duration: {} seconds",
            stats.run_id,
            stats.frames_decoded,
            stats.checksum_failures,
            stats.sync_bytes_skipped,
            stats.env_read_failures,
            stats.windows_persisted,
            stats.empty_windows,
            stats.run_duration_secs
        )
    }

    /// Save counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                frames_decoded: stats.frames_decoded,
                checksum_failures: stats.checksum_failures,
                sync_bytes_skipped: stats.sync_bytes_skipped,
                env_read_failures: stats.env_read_failures,
                windows_persisted: stats.windows_persisted,
                empty_windows: stats.empty_windows,
                last_run_id: stats.run_id,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load counters from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let persisted = read_persisted(path)?;

                self.frames_decoded
                    .store(persisted.frames_decoded, Ordering::Relaxed);
                self.checksum_failures
                    .store(persisted.checksum_failures, Ordering::Relaxed);
                self.sync_bytes_skipped
                    .store(persisted.sync_bytes_skipped, Ordering::Relaxed);
                self.env_read_failures
                    .store(persisted.env_read_failures, Ordering::Relaxed);
                self.windows_persisted
                    .store(persisted.windows_persisted, Ordering::Relaxed);
                self.empty_windows
                    .store(persisted.empty_windows, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the run counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsStats {
    pub frames_decoded: u64,
    pub checksum_failures: u64,
    pub sync_bytes_skipped: u64,
    pub env_read_failures: u64,
    pub windows_persisted: u64,
    pub empty_windows: u64,
    pub run_id: Uuid,
    pub run_start: DateTime<Utc>,
    pub run_duration_secs: u64,
}

/// Counter format on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStats {
    pub frames_decoded: u64,
    pub checksum_failures: u64,
    pub sync_bytes_skipped: u64,
    pub env_read_failures: u64,
    pub windows_persisted: u64,
    pub empty_windows: u64,
    pub last_run_id: Uuid,
    pub last_updated: DateTime<Utc>,
}

/// Read counters saved by a previous run.
pub fn read_persisted(path: &std::path::Path) -> Result<PersistedStats, std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(std::io::Error::other)
}

/// Thread-safe shared counter log.
pub type SharedDiagnostics = Arc<DiagnosticsLog>;

/// Create a new shared counter log.
pub fn create_shared_log() -> SharedDiagnostics {
    Arc::new(DiagnosticsLog::new())
}

/// Create a new shared counter log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedDiagnostics {
    Arc::new(DiagnosticsLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let log = DiagnosticsLog::new();

        log.record_frame_decoded();
        log.record_frame_decoded();
        log.record_checksum_failure();
        log.record_sync_bytes_skipped(5);

        let stats = log.stats();
        assert_eq!(stats.frames_decoded, 2);
        assert_eq!(stats.checksum_failures, 1);
        assert_eq!(stats.sync_bytes_skipped, 5);
    }

    #[test]
    fn test_summary_format() {
        let log = DiagnosticsLog::new();
        let summary = log.summary();

        assert!(summary.contains("Frames decoded"));
        assert!(summary.contains("Checksum failures"));
        assert!(summary.contains(&log.run_id().to_string()));
    }

    #[test]
    fn test_persistence_carries_over() {
        let path = std::env::temp_dir()
            .join("pms-logger-diagnostics-test")
            .join(format!("{}.json", Uuid::new_v4()));

        let first = DiagnosticsLog::with_persistence(path.clone());
        first.record_frame_decoded();
        first.record_window_persisted();
        first.save().unwrap();

        let second = DiagnosticsLog::with_persistence(path.clone());
        second.record_frame_decoded();
        let stats = second.stats();
        assert_eq!(stats.frames_decoded, 2);
        assert_eq!(stats.windows_persisted, 1);
        assert_ne!(second.run_id(), first.run_id());

        assert_eq!(read_persisted(&path).unwrap().last_run_id, first.run_id());
        let _ = std::fs::remove_file(&path);
    }
}
