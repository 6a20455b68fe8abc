//! Window accumulation for particulate and environmental samples.
//!
//! Samples are summed over a fixed-duration window (default 4.9 seconds)
//! and averaged when the window is flushed. Particulate and environmental
//! samples are counted separately since the two sensors are polled
//! independently and either may miss a cycle.

use crate::protocol::{Frame, Particulates};
use crate::sensor::EnvReading;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Averages for one completed window, the unit of persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    /// Time the window was flushed
    pub timestamp: DateTime<Utc>,
    /// Time the window started
    pub window_start: DateTime<Utc>,
    /// Averaged particulate fields
    pub particulates: Particulates,
    /// Averaged temperature in °C, absent if no reading arrived
    pub temperature_c: Option<f64>,
    /// Averaged relative humidity in %, absent if no reading arrived
    pub humidity_percent: Option<f64>,
    /// Number of frames averaged
    pub samples: u32,
    /// Number of environmental readings averaged
    pub env_samples: u32,
}

impl fmt::Display for WindowResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.particulates;
        write!(
            f,
            "PM1.0 {} | PM2.5 {} | PM10 {} ug/m3 ({} frames)",
            p.pm1_0_cf1, p.pm2_5_cf1, p.pm10_cf1, self.samples
        )?;
        match (self.temperature_c, self.humidity_percent) {
            (Some(t), Some(h)) => write!(f, " | {t:.1}°C {h:.0}%"),
            _ => write!(f, " | no temp/humidity"),
        }
    }
}

/// Outcome of a flush attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Flush {
    /// The window has not elapsed yet; nothing changed.
    NotDue,
    /// The window elapsed without a single frame. State was reset.
    Empty {
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    },
    /// The window elapsed and produced averages.
    Complete(WindowResult),
}

/// Running sums for the current window.
#[derive(Debug, Clone)]
pub struct WindowAccumulator {
    /// Length of each window
    window_length: Duration,
    /// Start of the current window
    window_start: DateTime<Utc>,
    /// Per-field particulate sums, in wire order
    sums: [u64; Particulates::FIELD_COUNT],
    /// Frames folded into the current window
    samples: u32,
    temperature_sum: f64,
    humidity_sum: f64,
    /// Environmental readings folded into the current window
    env_samples: u32,
}

impl WindowAccumulator {
    /// Create an accumulator whose first window starts at `start`.
    pub fn new(window_length: std::time::Duration, start: DateTime<Utc>) -> Self {
        Self {
            window_length: Duration::from_std(window_length).unwrap_or(Duration::MAX),
            window_start: start,
            sums: [0; Particulates::FIELD_COUNT],
            samples: 0,
            temperature_sum: 0.0,
            humidity_sum: 0.0,
            env_samples: 0,
        }
    }

    /// Fold a valid frame, and the environmental reading taken in the same
    /// cycle if there was one, into the current window.
    pub fn accumulate(&mut self, frame: &Frame, env: Option<EnvReading>) {
        for (sum, value) in self.sums.iter_mut().zip(frame.particulates.to_array()) {
            *sum += u64::from(value);
        }
        self.samples += 1;

        if let Some(reading) = env {
            self.accumulate_environment(reading);
        }
    }

    /// Fold an environmental reading taken in a cycle without a usable frame.
    pub fn accumulate_environment(&mut self, reading: EnvReading) {
        self.temperature_sum += reading.temperature_c;
        self.humidity_sum += reading.humidity_percent;
        self.env_samples += 1;
    }

    /// Close the window if it has elapsed at `now`.
    ///
    /// When due, averages are computed, all sums are cleared and the next
    /// window starts at `now`. A `now` earlier than the window start means
    /// the wall clock was stepped back; the window is closed immediately.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Flush {
        let elapsed = now - self.window_start;
        if elapsed < Duration::zero() {
            warn!(
                "clock moved back {}s since window start, closing window early",
                -elapsed.num_seconds()
            );
        } else if elapsed < self.window_length {
            return Flush::NotDue;
        }

        let window_start = self.window_start;
        let outcome = if self.samples == 0 {
            Flush::Empty {
                window_start,
                window_end: now,
            }
        } else {
            let mut averages = [0u16; Particulates::FIELD_COUNT];
            for (avg, &sum) in averages.iter_mut().zip(self.sums.iter()) {
                *avg = round_half_even(sum, u64::from(self.samples));
            }

            let (temperature_c, humidity_percent) = if self.env_samples > 0 {
                let n = f64::from(self.env_samples);
                (
                    Some(round_one_decimal(self.temperature_sum / n)),
                    Some(round_one_decimal(self.humidity_sum / n)),
                )
            } else {
                (None, None)
            };

            Flush::Complete(WindowResult {
                timestamp: now,
                window_start,
                particulates: Particulates::from_array(averages),
                temperature_c,
                humidity_percent,
                samples: self.samples,
                env_samples: self.env_samples,
            })
        };

        self.reset(now);
        outcome
    }

    fn reset(&mut self, start: DateTime<Utc>) {
        self.window_start = start;
        self.sums = [0; Particulates::FIELD_COUNT];
        self.samples = 0;
        self.temperature_sum = 0.0;
        self.humidity_sum = 0.0;
        self.env_samples = 0;
    }

    /// Start of the current window.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// Frames folded into the current window.
    pub fn sample_count(&self) -> u32 {
        self.samples
    }

    /// Environmental readings folded into the current window.
    pub fn env_sample_count(&self) -> u32 {
        self.env_samples
    }
}

/// Integer division rounded to nearest, ties to even. `count` must be non-zero.
fn round_half_even(sum: u64, count: u64) -> u16 {
    let quotient = sum / count;
    let twice_rem = (sum % count) * 2;
    let rounded = if twice_rem > count || (twice_rem == count && quotient % 2 == 1) {
        quotient + 1
    } else {
        quotient
    };
    // Average of u16 values always fits.
    rounded as u16
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
