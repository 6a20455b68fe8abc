//! The logging daemon's polling loop.
//!
//! Each cycle reads at most one frame, folds it (with a temperature/humidity
//! reading taken in the same cycle) into the current window, and persists
//! the window once it has elapsed. Only stream and store failures end the
//! loop; sync and checksum problems are counted and logged.

use crate::core::windowing::{Flush, WindowAccumulator, WindowResult};
use crate::diagnostics::SharedDiagnostics;
use crate::protocol::{Frame, FrameRead, FrameReader};
use crate::sensor::{EnvReading, EnvironmentSensor};
use crate::serial::ByteSource;
use chrono::{DateTime, Utc};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Destination for completed windows.
pub trait WindowSink {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist one window. An error is fatal for the daemon and should be
    /// logged by the sink.
    fn persist(&mut self, result: &WindowResult) -> Result<(), Self::Error>;
}

/// What the frame side of a cycle produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Not enough bytes buffered for a frame.
    NoData,
    /// A valid frame was folded into the window.
    Accepted(Frame),
    /// A frame failed its checksum and was dropped.
    Rejected { carried: u16, computed: u16 },
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    pub event: PollEvent,
    pub flush: Flush,
}

/// Fatal daemon errors.
#[derive(Debug)]
pub enum LoggerError {
    /// The byte stream ended.
    StreamClosed,
    /// Reading the byte stream failed.
    Stream(io::Error),
    /// Persisting a window failed.
    Store(Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Display for LoggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggerError::StreamClosed => write!(f, "Serial stream closed"),
            LoggerError::Stream(e) => write!(f, "Serial stream error: {e}"),
            LoggerError::Store(e) => write!(f, "Persistence error: {e}"),
        }
    }
}

impl std::error::Error for LoggerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoggerError::StreamClosed => None,
            LoggerError::Stream(e) => Some(e),
            LoggerError::Store(e) => Some(e.as_ref()),
        }
    }
}

/// Owns the reader, the environmental sensor, the current window and the sink.
pub struct Logger<S, E, W> {
    reader: FrameReader<S>,
    env_sensor: E,
    accumulator: WindowAccumulator,
    sink: W,
    diagnostics: SharedDiagnostics,
    /// Reader's skipped-byte total already reported to diagnostics
    reported_skipped: u64,
}

impl<S, E, W> Logger<S, E, W>
where
    S: ByteSource,
    E: EnvironmentSensor,
    W: WindowSink,
{
    /// Create a logger whose first window starts at `start`.
    pub fn new(
        source: S,
        env_sensor: E,
        sink: W,
        window_length: Duration,
        start: DateTime<Utc>,
        diagnostics: SharedDiagnostics,
    ) -> Self {
        Self {
            reader: FrameReader::new(source),
            env_sensor,
            accumulator: WindowAccumulator::new(window_length, start),
            sink,
            diagnostics,
            reported_skipped: 0,
        }
    }

    /// Run one cycle at time `now`.
    pub fn poll_once(&mut self, now: DateTime<Utc>) -> Result<Cycle, LoggerError> {
        let read = match self.reader.poll() {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                error!("serial stream closed");
                return Err(LoggerError::StreamClosed);
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                warn!("timed out reading frame, resynchronizing");
                None
            }
            Err(e) => {
                error!("serial read failed: {e}");
                return Err(LoggerError::Stream(e));
            }
        };
        self.report_skipped_bytes();

        let event = match read {
            None => PollEvent::NoData,
            Some(FrameRead::Valid(frame)) => {
                self.diagnostics.record_frame_decoded();
                let env = self.read_environment();
                self.accumulator.accumulate(&frame, env);
                PollEvent::Accepted(frame)
            }
            Some(FrameRead::ChecksumMismatch { frame, computed }) => {
                self.diagnostics.record_checksum_failure();
                if let Some(env) = self.read_environment() {
                    self.accumulator.accumulate_environment(env);
                }
                PollEvent::Rejected {
                    carried: frame.checksum,
                    computed,
                }
            }
        };

        let flush = self.accumulator.flush(now);
        match &flush {
            Flush::Complete(result) => {
                // The sink logs its own failure.
                self.sink
                    .persist(result)
                    .map_err(|e| LoggerError::Store(Box::new(e)))?;
                self.diagnostics.record_window_persisted();
                info!(
                    samples = result.samples,
                    env_samples = result.env_samples,
                    "window persisted: {result}"
                );
            }
            Flush::Empty { window_start, .. } => {
                self.diagnostics.record_empty_window();
                warn!("no frames received since {window_start}, nothing persisted");
            }
            Flush::NotDue => {}
        }

        Ok(Cycle { event, flush })
    }

    /// Poll until `running` is cleared or a fatal error occurs.
    ///
    /// `on_window` sees every persisted window.
    pub fn run<F>(
        &mut self,
        running: &AtomicBool,
        poll_interval: Duration,
        mut on_window: F,
    ) -> Result<(), LoggerError>
    where
        F: FnMut(&WindowResult),
    {
        info!(
            env_sensor = self.env_sensor.name(),
            "polling every {}ms",
            poll_interval.as_millis()
        );

        while running.load(Ordering::SeqCst) {
            let cycle = self.poll_once(Utc::now())?;
            if let Flush::Complete(ref result) = cycle.flush {
                on_window(result);
            }
            thread::sleep(poll_interval);
        }

        info!("polling stopped");
        Ok(())
    }

    fn read_environment(&mut self) -> Option<EnvReading> {
        let reading = self.env_sensor.read();
        if reading.is_none() {
            self.diagnostics.record_env_read_failure();
            debug!(sensor = self.env_sensor.name(), "no temperature/humidity this cycle");
        }
        reading
    }

    fn report_skipped_bytes(&mut self) {
        let skipped = self.reader.skipped_bytes();
        if skipped > self.reported_skipped {
            let delta = skipped - self.reported_skipped;
            debug!(bytes = delta, "discarded bytes while syncing");
            self.diagnostics.record_sync_bytes_skipped(delta);
            self.reported_skipped = skipped;
        }
    }

    /// The current window.
    pub fn accumulator(&self) -> &WindowAccumulator {
        &self.accumulator
    }

    /// The window sink.
    pub fn sink(&self) -> &W {
        &self.sink
    }

    /// Access the underlying byte source.
    pub fn source_mut(&mut self) -> &mut S {
        self.reader.source_mut()
    }

    /// Consume the logger, returning the sink.
    pub fn into_sink(self) -> W {
        self.sink
    }
}
