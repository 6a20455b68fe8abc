//! Temperature/humidity acquisition.
//!
//! The environmental sensor is polled once per particulate cycle. A failed
//! read is never an error: the cycle simply contributes no sample.

pub mod iio;
pub mod noop;
pub mod types;

// Re-export commonly used types
pub use iio::IioSensor;
pub use noop::NoopSensor;
pub use types::EnvReading;

use std::path::PathBuf;

/// A source of temperature/humidity readings.
pub trait EnvironmentSensor {
    /// Attempt one reading. `None` means no data this cycle.
    fn read(&mut self) -> Option<EnvReading>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

impl<T: EnvironmentSensor + ?Sized> EnvironmentSensor for Box<T> {
    fn read(&mut self) -> Option<EnvReading> {
        (**self).read()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Build the sensor for an optional IIO device directory.
pub fn from_device(device_dir: Option<PathBuf>) -> Box<dyn EnvironmentSensor> {
    match device_dir {
        Some(dir) => Box::new(IioSensor::new(dir)),
        None => Box::new(NoopSensor),
    }
}
