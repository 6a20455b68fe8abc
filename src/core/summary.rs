//! Summary statistics over persisted windows.

use crate::store::StoredRow;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Statistics for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub name: String,
    /// Rows with a value for this field
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation, absent with fewer than two values
    pub std_dev: Option<f64>,
    pub min: f64,
    pub max: f64,
}

/// Summarize the headline columns of `rows`.
///
/// Fields without any value (e.g. temperature when no sensor is attached)
/// are left out.
pub fn summarize(rows: &[StoredRow]) -> Vec<FieldSummary> {
    let columns: [(&str, Vec<f64>); 5] = [
        (
            "pm1_0_cf1",
            rows.iter()
                .map(|r| f64::from(r.particulates.pm1_0_cf1))
                .collect(),
        ),
        (
            "pm2_5_cf1",
            rows.iter()
                .map(|r| f64::from(r.particulates.pm2_5_cf1))
                .collect(),
        ),
        (
            "pm10_cf1",
            rows.iter()
                .map(|r| f64::from(r.particulates.pm10_cf1))
                .collect(),
        ),
        (
            "temperature_c",
            rows.iter().filter_map(|r| r.temperature_c).collect(),
        ),
        (
            "humidity_percent",
            rows.iter().filter_map(|r| r.humidity_percent).collect(),
        ),
    ];

    columns
        .into_iter()
        .filter_map(|(name, values)| summarize_field(name, &values))
        .collect()
}

fn summarize_field(name: &str, values: &[f64]) -> Option<FieldSummary> {
    if values.is_empty() {
        return None;
    }

    Some(FieldSummary {
        name: name.to_string(),
        count: values.len(),
        mean: Statistics::mean(values),
        std_dev: (values.len() > 1).then(|| Statistics::std_dev(values)),
        min: Statistics::min(values),
        max: Statistics::max(values),
    })
}
