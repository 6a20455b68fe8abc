//! DHT22 readings through the Linux IIO subsystem.
//!
//! With the `dht11` overlay enabled the kernel exposes the sensor under
//! `/sys/bus/iio/devices/iio:deviceN/`. Values are in milli-units. The
//! driver returns an I/O error whenever the sensor misses a handshake,
//! which happens routinely; those reads are reported as no data.

use crate::sensor::types::EnvReading;
use crate::sensor::EnvironmentSensor;
use std::path::PathBuf;
use tracing::{debug, warn};

const TEMPERATURE_FILE: &str = "in_temp_input";
const HUMIDITY_FILE: &str = "in_humidityrelative_input";

/// Temperature/humidity sensor backed by an IIO device directory.
pub struct IioSensor {
    device_dir: PathBuf,
    /// Consecutive failed reads, reset on success
    consecutive_failures: u32,
}

impl IioSensor {
    /// Create a sensor reading from the given IIO device directory.
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_dir: device_dir.into(),
            consecutive_failures: 0,
        }
    }

    fn read_milli(&self, file: &str) -> Result<f64, String> {
        let path = self.device_dir.join(file);
        let raw = std::fs::read_to_string(&path).map_err(|e| format!("{path:?}: {e}"))?;
        let milli: i64 = raw
            .trim()
            .parse()
            .map_err(|e| format!("{path:?}: invalid value '{}': {e}", raw.trim()))?;
        Ok(milli as f64 / 1000.0)
    }

    fn read_pair(&self) -> Result<EnvReading, String> {
        Ok(EnvReading::new(
            self.read_milli(TEMPERATURE_FILE)?,
            self.read_milli(HUMIDITY_FILE)?,
        ))
    }
}

impl EnvironmentSensor for IioSensor {
    fn read(&mut self) -> Option<EnvReading> {
        match self.read_pair() {
            Ok(reading) if reading.is_plausible() => {
                self.consecutive_failures = 0;
                Some(reading)
            }
            Ok(reading) => {
                warn!(?reading, "discarding implausible temperature/humidity reading");
                self.consecutive_failures += 1;
                None
            }
            Err(e) => {
                self.consecutive_failures += 1;
                debug!(failures = self.consecutive_failures, "no temperature/humidity data: {e}");
                None
            }
        }
    }

    fn name(&self) -> &str {
        "iio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("pms-logger-iio-test")
            .join(format!("{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_reads_milli_units() {
        let dir = device_dir("ok");
        std::fs::write(dir.join(TEMPERATURE_FILE), "21300\n").unwrap();
        std::fs::write(dir.join(HUMIDITY_FILE), "45600\n").unwrap();

        let mut sensor = IioSensor::new(&dir);
        assert_eq!(sensor.read(), Some(EnvReading::new(21.3, 45.6)));
    }

    #[test]
    fn test_missing_files_are_no_data() {
        let dir = device_dir("missing");
        std::fs::write(dir.join(TEMPERATURE_FILE), "21300\n").unwrap();

        let mut sensor = IioSensor::new(&dir);
        assert_eq!(sensor.read(), None);
        assert_eq!(sensor.consecutive_failures, 1);
    }

    #[test]
    fn test_garbage_is_no_data() {
        let dir = device_dir("garbage");
        std::fs::write(dir.join(TEMPERATURE_FILE), "n/a").unwrap();
        std::fs::write(dir.join(HUMIDITY_FILE), "45600").unwrap();

        let mut sensor = IioSensor::new(&dir);
        assert_eq!(sensor.read(), None);
    }

    #[test]
    fn test_implausible_values_rejected() {
        let dir = device_dir("implausible");
        std::fs::write(dir.join(TEMPERATURE_FILE), "150000").unwrap();
        std::fs::write(dir.join(HUMIDITY_FILE), "45600").unwrap();

        let mut sensor = IioSensor::new(&dir);
        assert_eq!(sensor.read(), None);
    }
}
