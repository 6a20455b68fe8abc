//! Sensor used when no temperature/humidity device is configured.
//!
//! Every read reports no data, so windows carry particulate averages only.

use crate::sensor::types::EnvReading;
use crate::sensor::EnvironmentSensor;

/// A sensor that never produces readings.
#[derive(Debug, Default)]
pub struct NoopSensor;

impl EnvironmentSensor for NoopSensor {
    fn read(&mut self) -> Option<EnvReading> {
        None
    }

    fn name(&self) -> &str {
        "none"
    }
}
