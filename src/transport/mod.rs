//! Line-oriented transport to the scanning device.
//!
//! The session protocol only needs two capabilities from the channel: write
//! bytes, and block until one complete newline-terminated line is available.
//! [`LineTransport`] captures exactly that, so the protocol runs unchanged over
//! a real serial port ([`SerialTransport`]) or a simulated device
//! ([`MockDevice`]).

use crate::error::ScanResult;

pub mod mock;
pub mod serial;

pub use mock::MockDevice;
pub use serial::SerialTransport;

/// Baud rate the device firmware is fixed to.
pub const BAUD_RATE: u32 = 115_200;

/// Byte-oriented, newline-delimited duplex channel.
pub trait LineTransport {
    /// Write all bytes to the channel.
    fn write_all(&mut self, bytes: &[u8]) -> ScanResult<()>;

    /// Block until one full line has been received.
    ///
    /// The returned string still carries its terminator (`\n`, possibly
    /// preceded by `\r`). A closed channel is an error, never an empty line.
    fn read_line(&mut self) -> ScanResult<String>;

    /// Write `line` followed by a single `\n`.
    fn write_line(&mut self, line: &str) -> ScanResult<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write_all(&bytes)
    }
}

impl<T: LineTransport + ?Sized> LineTransport for &mut T {
    fn write_all(&mut self, bytes: &[u8]) -> ScanResult<()> {
        (**self).write_all(bytes)
    }

    fn read_line(&mut self) -> ScanResult<String> {
        (**self).read_line()
    }
}

impl<T: LineTransport + ?Sized> LineTransport for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> ScanResult<()> {
        (**self).write_all(bytes)
    }

    fn read_line(&mut self) -> ScanResult<String> {
        (**self).read_line()
    }
}
