//! Simulated scanning device for tests and dry runs.
//!
//! `MockDevice` plays the firmware side of the protocol: it answers the
//! handshake, collects the configuration values, and on `__start__` queues a
//! stream of `x,y,z` records followed by the `__close__` sentinel. Clones share
//! state, so a test can hand one clone to a `Session` and inspect the other.
//!
//! When nothing is left to read, `read_line` reports a closed channel, which is
//! how a disconnect surfaces on real hardware.
//!
//! # Example
//!
//! ```
//! use surface_daq::transport::{LineTransport, MockDevice};
//!
//! let device = MockDevice::new().confirm_on_request(2);
//! let mut host = device.clone();
//! host.write_line("connection request").unwrap();
//! assert_eq!(host.read_line().unwrap(), "no connection\r\n");
//! host.write_line("connection request").unwrap();
//! assert_eq!(host.read_line().unwrap(), "connection confirmation\r\n");
//! ```

use super::LineTransport;
use crate::error::{ScanError, ScanResult};
use crate::protocol::messages::{
    CLOSE_SENTINEL, CONNECTION_ACKNOWLEDGEMENT, CONNECTION_CONFIRMATION, CONNECTION_REQUEST,
    START_COMMAND,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Reply sent for a connection request that is not confirmed.
pub const HANDSHAKE_REJECTION: &str = "no connection";

type HeightFn = Box<dyn Fn(f64, f64) -> f64 + Send>;

enum StreamSource {
    Scripted(Vec<String>),
    Raster(HeightFn),
}

struct MockDeviceInner {
    inbound: Vec<u8>,
    written: Vec<String>,
    outbound: VecDeque<String>,
    requests_seen: u32,
    confirm_on: Option<u32>,
    acknowledged: bool,
    config_values: Vec<f64>,
    source: StreamSource,
    send_close: bool,
}

/// Simulated device speaking the acquisition protocol.
#[derive(Clone)]
pub struct MockDevice {
    inner: Arc<Mutex<MockDeviceInner>>,
}

impl MockDevice {
    /// A device that confirms the first connection request and streams nothing
    /// but the sentinel.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockDeviceInner {
                inbound: Vec::new(),
                written: Vec::new(),
                outbound: VecDeque::new(),
                requests_seen: 0,
                confirm_on: Some(1),
                acknowledged: false,
                config_values: Vec::new(),
                source: StreamSource::Scripted(Vec::new()),
                send_close: true,
            })),
        }
    }

    /// Confirm on the `n`th connection request (1-based).
    pub fn confirm_on_request(self, n: u32) -> Self {
        self.lock().confirm_on = Some(n.max(1));
        self
    }

    /// Never confirm a connection request.
    pub fn never_confirm(self) -> Self {
        self.lock().confirm_on = None;
        self
    }

    /// Stream these lines verbatim after `__start__`. Each gets a `\r\n`.
    pub fn with_records<I, S>(self, records: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().source = StreamSource::Scripted(records.into_iter().map(Into::into).collect());
        self
    }

    /// Raster-scan a surface using the configuration the host sends.
    ///
    /// `height(x, y)` returns the z reading in mm at each raster point.
    pub fn with_surface<F>(self, height: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + 'static,
    {
        self.lock().source = StreamSource::Raster(Box::new(height));
        self
    }

    /// Stop streaming without a sentinel, as if the device were unplugged.
    pub fn without_close(self) -> Self {
        self.lock().send_close = false;
        self
    }

    /// Every complete line the host wrote, without terminators.
    pub fn written_lines(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// Configuration values received after the handshake, in arrival order.
    pub fn received_configuration(&self) -> Vec<f64> {
        self.lock().config_values.clone()
    }

    /// Number of connection requests received.
    pub fn requests_seen(&self) -> u32 {
        self.lock().requests_seen
    }

    /// Lines queued but not yet read by the host.
    pub fn pending_lines(&self) -> usize {
        self.lock().outbound.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockDeviceInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeviceInner {
    fn handle_line(&mut self, line: String) {
        let command = line.trim_end_matches('\r');
        if command == CONNECTION_REQUEST {
            self.requests_seen += 1;
            let confirmed = self
                .confirm_on
                .is_some_and(|n| self.requests_seen >= n);
            let reply = if confirmed {
                CONNECTION_CONFIRMATION
            } else {
                HANDSHAKE_REJECTION
            };
            self.outbound.push_back(format!("{}\r\n", reply));
        } else if command == CONNECTION_ACKNOWLEDGEMENT {
            self.acknowledged = true;
        } else if command == START_COMMAND {
            self.queue_stream();
        } else if self.acknowledged {
            if let Ok(value) = command.parse::<f64>() {
                self.config_values.push(value);
            }
        }
        self.written.push(line);
    }

    fn queue_stream(&mut self) {
        let lines: Vec<String> = match &self.source {
            StreamSource::Scripted(lines) => lines.clone(),
            StreamSource::Raster(height) => match self.config_values.as_slice() {
                [x_distance, y_distance, x_step, y_step, ..] => {
                    raster(*x_distance, *y_distance, *x_step, *y_step, height)
                }
                _ => Vec::new(),
            },
        };
        self.outbound
            .extend(lines.into_iter().map(|line| format!("{}\r\n", line)));
        if self.send_close {
            self.outbound.push_back(format!("{}\r\n", CLOSE_SENTINEL));
        }
    }
}

fn raster(x_distance: f64, y_distance: f64, x_step: f64, y_step: f64, height: &HeightFn) -> Vec<String> {
    if x_step <= 0.0 || y_step <= 0.0 {
        return Vec::new();
    }
    let columns = (x_distance / x_step).floor() as usize;
    let rows = (y_distance / y_step).floor() as usize;
    let mut lines = Vec::with_capacity((columns + 1) * (rows + 1));
    for row in 0..=rows {
        let y = row as f64 * y_step;
        for column in 0..=columns {
            let x = column as f64 * x_step;
            lines.push(format!("{},{},{}", x, y, height(x, y)));
        }
    }
    lines
}

impl LineTransport for MockDevice {
    fn write_all(&mut self, bytes: &[u8]) -> ScanResult<()> {
        let mut inner = self.lock();
        inner.inbound.extend_from_slice(bytes);
        while let Some(end) = inner.inbound.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = inner.inbound.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            inner.handle_line(line);
        }
        Ok(())
    }

    fn read_line(&mut self) -> ScanResult<String> {
        self.lock()
            .outbound
            .pop_front()
            .ok_or(ScanError::TransportClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirms_on_requested_attempt() {
        let mut device = MockDevice::new().confirm_on_request(3);
        for _ in 0..2 {
            device.write_line(CONNECTION_REQUEST).unwrap();
            assert_eq!(device.read_line().unwrap(), "no connection\r\n");
        }
        device.write_line(CONNECTION_REQUEST).unwrap();
        assert_eq!(device.read_line().unwrap(), "connection confirmation\r\n");
        assert_eq!(device.requests_seen(), 3);
    }

    #[test]
    fn test_partial_writes_are_reassembled() {
        let mut device = MockDevice::new();
        device.write_all(b"connection ").unwrap();
        assert!(device.written_lines().is_empty());
        device.write_all(b"request\n").unwrap();
        assert_eq!(device.written_lines(), vec!["connection request"]);
    }

    #[test]
    fn test_raster_uses_received_configuration() {
        let mut device = MockDevice::new().with_surface(|x, y| x + y);
        for line in [
            CONNECTION_REQUEST,
            CONNECTION_ACKNOWLEDGEMENT,
            "2.0",
            "1.0",
            "1.0",
            "1.0",
            START_COMMAND,
        ] {
            device.write_line(line).unwrap();
        }
        // Drop the handshake confirmation
        device.read_line().unwrap();

        assert_eq!(device.received_configuration(), vec![2.0, 1.0, 1.0, 1.0]);
        // 3 columns x 2 rows + sentinel
        assert_eq!(device.pending_lines(), 7);
        assert_eq!(device.read_line().unwrap(), "0,0,0\r\n");
        assert_eq!(device.read_line().unwrap(), "1,0,1\r\n");
    }

    #[test]
    fn test_empty_queue_reads_as_closed() {
        let mut device = MockDevice::new();
        assert!(matches!(device.read_line(), Err(ScanError::TransportClosed)));
    }

    #[test]
    fn test_values_before_acknowledgement_are_not_configuration() {
        let mut device = MockDevice::new();
        device.write_line("170.0").unwrap();
        assert!(device.received_configuration().is_empty());
    }
}
