//! Byte sources feeding the frame reader.
//!
//! The reader only needs two things from a source: how many bytes can be
//! read without blocking, and an exact read. A serial port provides both,
//! and so does an in-memory cursor used for tests and captured dumps.

use serialport::SerialPort;
use std::io::{self, Cursor, Read};
use std::time::Duration;
use tracing::info;

/// Default read timeout for the serial port.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// A read-only byte stream that can report pending bytes.
pub trait ByteSource {
    /// Number of bytes that can be read right now.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Fill `buf` completely.
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

impl ByteSource for Box<dyn SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        let pending = self.bytes_to_read().map_err(io::Error::from)?;
        Ok(pending as usize)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        Read::read_exact(self, buf)
    }
}

impl<T: AsRef<[u8]>> ByteSource for Cursor<T> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        let len = self.get_ref().as_ref().len() as u64;
        Ok(len.saturating_sub(self.position()) as usize)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        Read::read_exact(self, buf)
    }
}

/// Open the sensor's serial port (8N1, no flow control).
pub fn open_port(path: &str, baud_rate: u32) -> io::Result<Box<dyn SerialPort>> {
    let port = serialport::new(path, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(io::Error::from)?;

    info!(path, baud_rate, "opened serial port");
    Ok(port)
}
