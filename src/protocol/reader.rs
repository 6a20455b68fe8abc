//! Frame synchronization over a byte source.
//!
//! The reader hunts for the two sync bytes one byte at a time, then reads
//! the 30-byte payload once it is fully available. Every frame, valid or
//! not, consumes exactly 32 bytes; hunting restarts at the next byte.

use crate::protocol::frame::{
    compute_checksum, Frame, FRAME_LEN, PAYLOAD_LEN, SYNC_HIGH, SYNC_LOW,
};
use crate::serial::ByteSource;
use std::io;
use tracing::{debug, warn};

/// Result of a successful read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    /// Frame passed the checksum.
    Valid(Frame),
    /// Frame was decoded but its checksum did not match.
    ChecksumMismatch { frame: Frame, computed: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    /// Looking for the sync pair; holds the previous byte if it was `SYNC_HIGH`.
    Hunting { seen_high: bool },
    /// Sync pair consumed, waiting for the payload.
    Synced,
}

/// Reads PMS7003 frames from a [`ByteSource`].
pub struct FrameReader<S> {
    source: S,
    state: SyncState,
    /// Bytes discarded while hunting for the sync pair
    skipped_bytes: u64,
}

impl<S: ByteSource> FrameReader<S> {
    /// Create a reader starting in the hunting state.
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: SyncState::Hunting { seen_high: false },
            skipped_bytes: 0,
        }
    }

    /// Attempt to read one frame without blocking on missing data.
    ///
    /// Returns `Ok(None)` when not enough bytes are buffered yet. Hunting
    /// only starts once a whole frame's worth of bytes is pending.
    pub fn poll(&mut self) -> io::Result<Option<FrameRead>> {
        if let SyncState::Hunting { .. } = self.state {
            let available = self.source.bytes_available()?;
            if available < FRAME_LEN {
                return Ok(None);
            }
            if !self.hunt(available)? {
                return Ok(None);
            }
        }

        if self.source.bytes_available()? < PAYLOAD_LEN {
            debug!("synced, waiting for payload");
            return Ok(None);
        }

        let mut payload = [0u8; PAYLOAD_LEN];
        self.state = SyncState::Hunting { seen_high: false };
        self.source.read_exact(&mut payload)?;

        let frame = Frame::decode(&payload);
        let computed = compute_checksum(&payload);
        if computed != frame.checksum {
            warn!(
                carried = frame.checksum,
                computed, "checksums don't match, skipping frame"
            );
            return Ok(Some(FrameRead::ChecksumMismatch { frame, computed }));
        }

        Ok(Some(FrameRead::Valid(frame)))
    }

    /// Consume up to `budget` bytes looking for the sync pair.
    fn hunt(&mut self, budget: usize) -> io::Result<bool> {
        let mut seen_high = match self.state {
            SyncState::Hunting { seen_high } => seen_high,
            SyncState::Synced => return Ok(true),
        };

        let mut byte = [0u8; 1];
        for _ in 0..budget {
            self.source.read_exact(&mut byte)?;
            match byte[0] {
                SYNC_LOW if seen_high => {
                    self.state = SyncState::Synced;
                    return Ok(true);
                }
                SYNC_HIGH => {
                    // A lone high byte before this one was not part of a frame.
                    if seen_high {
                        self.skipped_bytes += 1;
                    }
                    seen_high = true;
                }
                _ => {
                    self.skipped_bytes += if seen_high { 2 } else { 1 };
                    seen_high = false;
                }
            }
        }

        self.state = SyncState::Hunting { seen_high };
        Ok(false)
    }

    /// Forget any partial sync, e.g. after the source's buffer was cleared.
    pub fn reset(&mut self) {
        self.state = SyncState::Hunting { seen_high: false };
    }

    /// Total bytes discarded while hunting.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// Whether the reader has consumed a sync pair and awaits the payload.
    pub fn is_synced(&self) -> bool {
        self.state == SyncState::Synced
    }

    /// Access the underlying source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::Particulates;
    use std::io::Cursor;

    fn frame_with(value: u16) -> Frame {
        Frame {
            frame_length: 28,
            particulates: Particulates::from_array([value; Particulates::FIELD_COUNT]),
            version: 0x97,
            error_code: 0,
            checksum: 0,
        }
        .with_valid_checksum()
    }

    #[test]
    fn test_reads_aligned_frame() {
        let wire = frame_with(7).to_wire();
        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));

        match reader.poll().unwrap() {
            Some(FrameRead::Valid(frame)) => assert_eq!(frame.particulates.pm2_5_cf1, 7),
            other => panic!("unexpected read: {other:?}"),
        }
        assert_eq!(reader.skipped_bytes(), 0);
    }

    #[test]
    fn test_skips_leading_garbage() {
        let mut bytes = vec![0x00, 0x13, 0x42, 0x37];
        bytes.extend_from_slice(&frame_with(3).to_wire());
        let mut reader = FrameReader::new(Cursor::new(bytes));

        assert!(matches!(reader.poll().unwrap(), Some(FrameRead::Valid(_))));
        assert_eq!(reader.skipped_bytes(), 4);
    }

    #[test]
    fn test_repeated_high_byte_syncs_on_last() {
        let mut bytes = vec![0x42];
        bytes.extend_from_slice(&frame_with(9).to_wire());
        let mut reader = FrameReader::new(Cursor::new(bytes));

        match reader.poll().unwrap() {
            Some(FrameRead::Valid(frame)) => assert_eq!(frame.particulates.pm10_atm, 9),
            other => panic!("unexpected read: {other:?}"),
        }
        assert_eq!(reader.skipped_bytes(), 1);
    }

    #[test]
    fn test_waits_for_full_frame() {
        let wire = frame_with(1).to_wire();
        let mut reader = FrameReader::new(Cursor::new(wire[..20].to_vec()));

        assert_eq!(reader.poll().unwrap(), None);
        assert!(!reader.is_synced());
        assert_eq!(reader.source_mut().position(), 0);
    }

    #[test]
    fn test_keeps_sync_while_payload_incomplete() {
        // 4 garbage bytes give the hunt enough budget, but the payload is cut short.
        let wire = frame_with(1).to_wire();
        let mut bytes = vec![0x00; 4];
        bytes.extend_from_slice(&wire[..28]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        assert_eq!(reader.poll().unwrap(), None);
        assert!(reader.is_synced());
    }

    #[test]
    fn test_checksum_mismatch_then_resync() {
        let mut corrupt = frame_with(5).to_wire();
        corrupt[6] ^= 0xFF;
        let mut bytes = corrupt.to_vec();
        bytes.extend_from_slice(&frame_with(6).to_wire());
        let mut reader = FrameReader::new(Cursor::new(bytes));

        match reader.poll().unwrap() {
            Some(FrameRead::ChecksumMismatch { frame, computed }) => {
                assert_ne!(frame.checksum, computed);
            }
            other => panic!("unexpected read: {other:?}"),
        }
        assert_eq!(reader.source_mut().position(), FRAME_LEN as u64);

        match reader.poll().unwrap() {
            Some(FrameRead::Valid(frame)) => assert_eq!(frame.particulates.pm1_0_cf1, 6),
            other => panic!("unexpected read: {other:?}"),
        }
        assert_eq!(reader.skipped_bytes(), 0);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut bytes = Vec::new();
        for v in 1..=3 {
            bytes.extend_from_slice(&frame_with(v).to_wire());
        }
        let mut reader = FrameReader::new(Cursor::new(bytes));

        for v in 1..=3 {
            match reader.poll().unwrap() {
                Some(FrameRead::Valid(frame)) => assert_eq!(frame.particulates.count_0_3um, v),
                other => panic!("unexpected read: {other:?}"),
            }
        }
        assert_eq!(reader.poll().unwrap(), None);
    }
}
