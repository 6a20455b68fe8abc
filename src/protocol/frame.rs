//! PMS7003 data frame layout, decoding and checksum validation.
//!
//! A frame is 32 bytes on the wire:
//!
//! ```text
//! 0x42 0x4D | len(2) | cf1 pm1.0, pm2.5, pm10 (6) | atm pm1.0, pm2.5, pm10 (6)
//!           | counts >0.3 .. >10um (12) | version(1) | error(1) | checksum(2)
//! ```
//!
//! Everything after the sync pair is the 30-byte payload handled here.
//! All multi-byte fields are big-endian u16.

use serde::{Deserialize, Serialize};

/// First sync byte ('B').
pub const SYNC_HIGH: u8 = 0x42;
/// Second sync byte ('M').
pub const SYNC_LOW: u8 = 0x4D;
/// Full frame length including the sync pair.
pub const FRAME_LEN: usize = 32;
/// Payload length following the sync pair.
pub const PAYLOAD_LEN: usize = 30;

/// Number of payload bytes covered by the checksum.
const CHECKSUM_COVERAGE: usize = 27;
/// Offset of the checksum field inside the payload.
const CHECKSUM_OFFSET: usize = 28;

/// The twelve particulate fields reported by the sensor.
///
/// Concentrations are in µg/m³, counts are particles per 0.1 L of air.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Particulates {
    /// PM1.0, factory (CF=1) calibration
    pub pm1_0_cf1: u16,
    /// PM2.5, factory (CF=1) calibration
    pub pm2_5_cf1: u16,
    /// PM10, factory (CF=1) calibration
    pub pm10_cf1: u16,
    /// PM1.0, atmospheric calibration
    pub pm1_0_atm: u16,
    /// PM2.5, atmospheric calibration
    pub pm2_5_atm: u16,
    /// PM10, atmospheric calibration
    pub pm10_atm: u16,
    /// Particles > 0.3 µm
    pub count_0_3um: u16,
    /// Particles > 0.5 µm
    pub count_0_5um: u16,
    /// Particles > 1.0 µm
    pub count_1_0um: u16,
    /// Particles > 2.5 µm
    pub count_2_5um: u16,
    /// Particles > 5.0 µm
    pub count_5_0um: u16,
    /// Particles > 10 µm
    pub count_10um: u16,
}

impl Particulates {
    /// Number of fields, in wire order.
    pub const FIELD_COUNT: usize = 12;

    /// Metric names in wire order.
    pub const FIELD_NAMES: [&'static str; Self::FIELD_COUNT] = [
        "pm1_0_cf1",
        "pm2_5_cf1",
        "pm10_cf1",
        "pm1_0_atm",
        "pm2_5_atm",
        "pm10_atm",
        "count_0_3um",
        "count_0_5um",
        "count_1_0um",
        "count_2_5um",
        "count_5_0um",
        "count_10um",
    ];

    /// Build from fields in wire order.
    pub fn from_array(values: [u16; Self::FIELD_COUNT]) -> Self {
        Self {
            pm1_0_cf1: values[0],
            pm2_5_cf1: values[1],
            pm10_cf1: values[2],
            pm1_0_atm: values[3],
            pm2_5_atm: values[4],
            pm10_atm: values[5],
            count_0_3um: values[6],
            count_0_5um: values[7],
            count_1_0um: values[8],
            count_2_5um: values[9],
            count_5_0um: values[10],
            count_10um: values[11],
        }
    }

    /// Fields in wire order.
    pub fn to_array(&self) -> [u16; Self::FIELD_COUNT] {
        [
            self.pm1_0_cf1,
            self.pm2_5_cf1,
            self.pm10_cf1,
            self.pm1_0_atm,
            self.pm2_5_atm,
            self.pm10_atm,
            self.count_0_3um,
            self.count_0_5um,
            self.count_1_0um,
            self.count_2_5um,
            self.count_5_0um,
            self.count_10um,
        ]
    }
}

/// A decoded sensor frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame length as reported by the sensor (not validated)
    pub frame_length: u16,
    pub particulates: Particulates,
    /// Protocol version
    pub version: u8,
    /// Sensor error code
    pub error_code: u8,
    /// Checksum carried in the frame
    pub checksum: u16,
}

impl Frame {
    /// Decode the 30 payload bytes following a sync pair.
    ///
    /// Decoding never fails; use [`Frame::is_valid`] or [`verify_checksum`]
    /// to find out whether the result can be trusted.
    pub fn decode(payload: &[u8; PAYLOAD_LEN]) -> Self {
        let mut fields = [0u16; Particulates::FIELD_COUNT];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = read_u16(payload, 2 + i * 2);
        }

        Self {
            frame_length: read_u16(payload, 0),
            particulates: Particulates::from_array(fields),
            version: payload[26],
            error_code: payload[27],
            checksum: read_u16(payload, CHECKSUM_OFFSET),
        }
    }

    /// Rebuild the 30-byte payload for this frame.
    ///
    /// The stored checksum is written as-is; call [`Frame::with_valid_checksum`]
    /// first to produce a frame the sensor would have sent.
    pub fn encode(&self) -> [u8; PAYLOAD_LEN] {
        let mut payload = [0u8; PAYLOAD_LEN];
        write_u16(&mut payload, 0, self.frame_length);
        for (i, value) in self.particulates.to_array().iter().enumerate() {
            write_u16(&mut payload, 2 + i * 2, *value);
        }
        payload[26] = self.version;
        payload[27] = self.error_code;
        write_u16(&mut payload, CHECKSUM_OFFSET, self.checksum);
        payload
    }

    /// Encode the full 32-byte wire frame, sync pair included.
    pub fn to_wire(&self) -> [u8; FRAME_LEN] {
        let mut wire = [0u8; FRAME_LEN];
        wire[0] = SYNC_HIGH;
        wire[1] = SYNC_LOW;
        wire[2..].copy_from_slice(&self.encode());
        wire
    }

    /// Return a copy whose checksum field matches its contents.
    pub fn with_valid_checksum(mut self) -> Self {
        self.checksum = compute_checksum(&self.encode());
        self
    }

    /// Whether the carried checksum matches the frame contents.
    pub fn is_valid(&self) -> bool {
        verify_checksum(&self.encode())
    }
}

/// Checksum over the sync pair and the covered payload bytes.
///
/// The sum wraps at 16 bits. The checksum field itself is never included.
pub fn compute_checksum(payload: &[u8; PAYLOAD_LEN]) -> u16 {
    payload[..CHECKSUM_COVERAGE]
        .iter()
        .fold(u16::from(SYNC_HIGH) + u16::from(SYNC_LOW), |sum, &b| {
            sum.wrapping_add(u16::from(b))
        })
}

/// Compare the computed checksum with the one carried in the payload.
pub fn verify_checksum(payload: &[u8; PAYLOAD_LEN]) -> bool {
    compute_checksum(payload) == read_u16(payload, CHECKSUM_OFFSET)
}

fn read_u16(payload: &[u8; PAYLOAD_LEN], offset: usize) -> u16 {
    u16::from_be_bytes([payload[offset], payload[offset + 1]])
}

fn write_u16(payload: &mut [u8; PAYLOAD_LEN], offset: usize, value: u16) {
    payload[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}
