//! PMS7003 serial protocol.
//!
//! This module contains:
//! - The frame layout, decoder and checksum
//! - A synchronizing reader that pulls frames from a byte source

pub mod frame;
pub mod reader;

// Re-export commonly used types
pub use frame::{
    compute_checksum, verify_checksum, Frame, Particulates, FRAME_LEN, PAYLOAD_LEN, SYNC_HIGH,
    SYNC_LOW,
};
pub use reader::{FrameRead, FrameReader};
