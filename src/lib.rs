//! PMS Logger - particulate and temperature/humidity logging.
//!
//! This library reads Plantower PMS7003 frames from a serial port, merges in
//! readings from a DHT22 temperature/humidity sensor, averages both over
//! short fixed windows and stores one row per window in SQLite.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          PMS Logger                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │   Serial    │──▶│   Frame     │──▶│  Windowing  │         │
//! │  │  (PMS7003)  │   │   Reader    │   │  (4.9s avg) │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │                                         ▲       │            │
//! │  ┌─────────────┐                        │       ▼            │
//! │  │   DHT22     │────────────────────────┘ ┌─────────────┐    │
//! │  │   (IIO)     │                          │   SQLite    │    │
//! │  └─────────────┘                          │    Store    │    │
//! │                                           └─────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use pms_logger::{protocol::{FrameRead, FrameReader}, serial};
//!
//! let port = serial::open_port("/dev/ttyS0", 9600).expect("Failed to open port");
//! let mut reader = FrameReader::new(port);
//!
//! if let Ok(Some(FrameRead::Valid(frame))) = reader.poll() {
//!     println!("PM2.5: {} ug/m3", frame.particulates.pm2_5_cf1);
//! }
//! ```

pub mod config;
pub mod core;
pub mod diagnostics;
pub mod protocol;
pub mod sensor;
pub mod serial;
pub mod store;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{Flush, Logger, LoggerError, PollEvent, WindowAccumulator, WindowResult, WindowSink};
pub use diagnostics::{DiagnosticsLog, DiagnosticsStats, SharedDiagnostics};
pub use protocol::{Frame, FrameRead, FrameReader, Particulates};
pub use sensor::{EnvReading, EnvironmentSensor, IioSensor, NoopSensor};
pub use serial::ByteSource;
pub use store::{Database, StoreError, StoredRow};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
