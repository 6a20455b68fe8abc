//! Environmental reading types.

use serde::{Deserialize, Serialize};

/// One temperature/humidity reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvReading {
    /// Temperature in °C
    pub temperature_c: f64,
    /// Relative humidity in %
    pub humidity_percent: f64,
}

impl EnvReading {
    pub fn new(temperature_c: f64, humidity_percent: f64) -> Self {
        Self {
            temperature_c,
            humidity_percent,
        }
    }

    /// Whether the reading is within the DHT22 measurement range.
    pub fn is_plausible(&self) -> bool {
        (-40.0..=80.0).contains(&self.temperature_c)
            && (0.0..=100.0).contains(&self.humidity_percent)
    }
}
