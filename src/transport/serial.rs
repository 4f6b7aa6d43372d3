//! Serial port transport.
//!
//! Opens the device at a fixed baud rate (8N1, no flow control) and reads
//! through a `BufReader`, so bytes past a line boundary stay buffered for the
//! next read instead of being lost.
//!
//! The underlying port is polled with a short timeout. With no read timeout
//! configured, poll expiries are swallowed and `read_line` blocks until a full
//! line arrives. With a read timeout, a line that does not complete in time
//! fails with [`ScanError::ReadTimeout`].

use super::LineTransport;
use crate::error::{ScanError, ScanResult};
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
#[cfg(feature = "instrument_serial")]
use std::io::{BufRead, BufReader, ErrorKind, Write};
#[cfg(feature = "instrument_serial")]
use std::time::Instant;
#[cfg(feature = "instrument_serial")]
use tracing::{debug, info, trace};

/// Poll interval for the underlying port.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Serial port transport (requires the `instrument_serial` feature).
#[cfg(feature = "instrument_serial")]
pub struct SerialTransport {
    port_name: String,
    reader: BufReader<Box<dyn SerialPort>>,
    read_timeout: Option<Duration>,
}

#[cfg(feature = "instrument_serial")]
impl SerialTransport {
    /// Open `port_name` at `baud_rate`.
    pub fn open(port_name: &str, baud_rate: u32) -> ScanResult<Self> {
        info!(port = port_name, baud_rate, "Opening serial port");
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(POLL_INTERVAL)
            .open()
            .map_err(std::io::Error::from)?;

        Ok(Self::from_port(port_name, port))
    }

    /// Wrap an already opened port. Its own timeout is the poll interval.
    pub fn from_port(port_name: &str, port: Box<dyn SerialPort>) -> Self {
        Self {
            port_name: port_name.to_string(),
            reader: BufReader::new(port),
            read_timeout: None,
        }
    }

    /// Bound every `read_line` call.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Device path this transport was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[cfg(feature = "instrument_serial")]
impl LineTransport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> ScanResult<()> {
        trace!(port = %self.port_name, "-> '{}'", String::from_utf8_lossy(bytes).escape_default());
        let port = self.reader.get_mut();
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> ScanResult<String> {
        let started = Instant::now();
        let mut buffer = Vec::new();

        loop {
            // read_until keeps every byte read so far in `buffer`, even on error
            match self.reader.read_until(b'\n', &mut buffer) {
                Ok(0) => return Err(ScanError::TransportClosed),
                Ok(_) if buffer.ends_with(b"\n") => break,
                Ok(_) => return Err(ScanError::TransportClosed),
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                    if let Some(limit) = self.read_timeout {
                        if started.elapsed() >= limit {
                            debug!(
                                port = %self.port_name,
                                partial = buffer.len(),
                                "Line read timed out"
                            );
                            return Err(ScanError::ReadTimeout {
                                timeout_ms: limit.as_millis() as u64,
                            });
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let line = String::from_utf8_lossy(&buffer).into_owned();
        trace!(port = %self.port_name, "<- '{}'", line.escape_default());
        Ok(line)
    }
}

/// Placeholder when serial support is compiled out.
#[cfg(not(feature = "instrument_serial"))]
pub struct SerialTransport;

#[cfg(not(feature = "instrument_serial"))]
impl SerialTransport {
    /// Always fails: serial support is not compiled in.
    pub fn open(_port_name: &str, _baud_rate: u32) -> ScanResult<Self> {
        Err(ScanError::SerialFeatureDisabled)
    }

    /// No-op without serial support.
    pub fn with_read_timeout(self, _timeout: Option<Duration>) -> Self {
        self
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl LineTransport for SerialTransport {
    fn write_all(&mut self, _bytes: &[u8]) -> ScanResult<()> {
        Err(ScanError::SerialFeatureDisabled)
    }

    fn read_line(&mut self) -> ScanResult<String> {
        Err(ScanError::SerialFeatureDisabled)
    }
}
