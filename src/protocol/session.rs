//! Acquisition session state machine.
//!
//! A [`Session`] owns the transport, the recorder and the scan configuration
//! for exactly one measurement run and drives it through
//! `Idle → Handshaking → ConfigSending → AwaitingStart → Streaming → Closed`.
//!
//! Each phase is a method that checks the current state first, so calling
//! phases out of order is an error instead of a protocol desync. [`Session::run`]
//! executes all of them in sequence.
//!
//! Transport failures propagate immediately and are never retried. The only
//! retry is the handshake's, governed by [`RetryPolicy`].

use crate::config::{ScanConfiguration, Settings};
use crate::data::storage::Recorder;
use crate::error::{ScanError, ScanResult};
use crate::protocol::messages::{
    self, StreamLine, CONNECTION_ACKNOWLEDGEMENT, CONNECTION_REQUEST, START_COMMAND,
};
use crate::transport::LineTransport;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel open, nothing sent yet
    Idle,
    /// Sending connection requests
    Handshaking,
    /// Handshake acknowledged; configuration not yet sent
    ConfigSending,
    /// Configuration sent; waiting to send `__start__`
    AwaitingStart,
    /// Reading records
    Streaming,
    /// Sentinel received
    Closed,
}

impl SessionState {
    /// Stable name used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Handshaking => "handshaking",
            SessionState::ConfigSending => "config_sending",
            SessionState::AwaitingStart => "awaiting_start",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bound on handshake attempts.
///
/// The default is unbounded, matching the device's expectations: it may take
/// an arbitrary number of requests before the firmware finishes booting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum connection requests; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry until confirmed.
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    /// Give up after `attempts` requests.
    pub fn bounded(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts),
        }
    }

    fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

/// Settle delays around the handshake and start command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Wait before the first connection request (device boot)
    pub boot_delay: Duration,
    /// Wait before `__start__`
    pub start_delay: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            boot_delay: Duration::from_secs(3),
            start_delay: Duration::from_secs(1),
        }
    }
}

impl SessionTiming {
    /// No waiting at all (simulated devices).
    pub fn immediate() -> Self {
        Self {
            boot_delay: Duration::ZERO,
            start_delay: Duration::ZERO,
        }
    }
}

/// Outcome of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Connection requests sent before confirmation
    pub handshake_attempts: u32,
    /// Records forwarded to the recorder
    pub records: usize,
    /// Time from `__start__` to the sentinel
    pub streaming_time: Duration,
}

/// One acquisition run over a transport.
pub struct Session<T: LineTransport, R: Recorder> {
    transport: T,
    recorder: R,
    configuration: ScanConfiguration,
    timing: SessionTiming,
    retry: RetryPolicy,
    state: SessionState,
    handshake_attempts: u32,
    stream_started: Option<Instant>,
}

impl<T: LineTransport, R: Recorder> Session<T, R> {
    /// Create an idle session with default timing and unbounded handshake retry.
    pub fn new(transport: T, recorder: R, configuration: ScanConfiguration) -> Self {
        Self {
            transport,
            recorder,
            configuration,
            timing: SessionTiming::default(),
            retry: RetryPolicy::default(),
            state: SessionState::Idle,
            handshake_attempts: 0,
            stream_started: None,
        }
    }

    /// Create a session with timing, retry and scan parameters from settings.
    pub fn from_settings(transport: T, recorder: R, settings: &Settings) -> Self {
        Self::new(transport, recorder, settings.scan.clone())
            .with_timing(SessionTiming {
                boot_delay: settings.serial.boot_delay(),
                start_delay: settings.serial.start_delay(),
            })
            .with_retry_policy(RetryPolicy {
                max_attempts: settings.serial.handshake_max_attempts,
            })
    }

    /// Override settle delays.
    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Override the handshake retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Current phase.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Scan parameters this session sends.
    pub fn configuration(&self) -> &ScanConfiguration {
        &self.configuration
    }

    /// The recorder receiving streamed lines.
    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// Give back the transport and recorder.
    pub fn into_parts(self) -> (T, R) {
        (self.transport, self.recorder)
    }

    /// Run every phase through to the sentinel.
    pub fn run(&mut self) -> ScanResult<SessionSummary> {
        self.handshake()?;
        self.send_configuration()?;
        self.start()?;
        self.stream()
    }

    /// Perform the three-way handshake.
    ///
    /// Sends `connection request` and reads one line, repeating until the reply
    /// is exactly `connection confirmation`, then sends `connection
    /// acknowledgement`. Returns the number of requests sent.
    pub fn handshake(&mut self) -> ScanResult<u32> {
        self.expect_state(&[SessionState::Idle, SessionState::Handshaking])?;

        if self.state == SessionState::Idle {
            if !self.timing.boot_delay.is_zero() {
                info!(
                    delay_ms = self.timing.boot_delay.as_millis() as u64,
                    "Waiting for device to boot"
                );
                std::thread::sleep(self.timing.boot_delay);
            }
            self.state = SessionState::Handshaking;
            self.handshake_attempts = 0;
        }

        loop {
            let attempt = self.handshake_attempts + 1;
            if !self.retry.allows(attempt) {
                warn!(attempts = self.handshake_attempts, "Handshake retry limit reached");
                return Err(ScanError::HandshakeExhausted {
                    attempts: self.handshake_attempts,
                });
            }

            self.transport.write_line(CONNECTION_REQUEST)?;
            self.handshake_attempts = attempt;
            let reply = self.transport.read_line()?;

            if messages::is_confirmation(&reply) {
                self.transport.write_line(CONNECTION_ACKNOWLEDGEMENT)?;
                self.state = SessionState::ConfigSending;
                info!(
                    attempts = self.handshake_attempts,
                    "Established connection (3-way handshake)"
                );
                return Ok(self.handshake_attempts);
            }

            debug!(
                attempt,
                reply = %messages::strip_line_ending(&reply),
                "Handshake not confirmed, retrying"
            );
        }
    }

    /// Send the scan parameters in wire order, then open the recorder.
    ///
    /// The configuration is validated before anything is written.
    pub fn send_configuration(&mut self) -> ScanResult<()> {
        self.expect_state(&[SessionState::ConfigSending])?;
        self.configuration.validate()?;

        for (key, value) in self.configuration.wire_values() {
            let text = messages::format_value(value);
            debug!(key, value = %text, "Sending configuration value");
            self.transport.write_line(&text)?;
        }
        info!(
            x_distance_mm = self.configuration.x_distance_mm,
            y_distance_mm = self.configuration.y_distance_mm,
            x_step_mm = self.configuration.x_step_mm,
            y_step_mm = self.configuration.y_step_mm,
            "Sent scan configuration"
        );

        self.recorder.begin(&self.configuration)?;
        self.state = SessionState::AwaitingStart;
        Ok(())
    }

    /// Wait for the start delay and send `__start__`.
    pub fn start(&mut self) -> ScanResult<()> {
        self.expect_state(&[SessionState::AwaitingStart])?;

        if !self.timing.start_delay.is_zero() {
            std::thread::sleep(self.timing.start_delay);
        }
        self.transport.write_line(START_COMMAND)?;
        self.stream_started = Some(Instant::now());
        self.state = SessionState::Streaming;
        info!("Sent start message");
        Ok(())
    }

    /// Forward records to the recorder until the sentinel arrives.
    ///
    /// Lines are not validated; anything other than the exact sentinel is
    /// persisted as received (minus the line ending).
    pub fn stream(&mut self) -> ScanResult<SessionSummary> {
        self.expect_state(&[SessionState::Streaming])?;

        let started = self.stream_started.unwrap_or_else(Instant::now);
        let mut previous = started;
        let mut records = 0usize;

        loop {
            let raw = self.transport.read_line()?;
            match messages::classify(&raw) {
                StreamLine::Close => break,
                StreamLine::Record(line) => {
                    let now = Instant::now();
                    let since_previous = now.duration_since(previous);
                    previous = now;

                    info!(
                        record = line,
                        latency_ms = since_previous.as_secs_f64() * 1000.0,
                        "Received record"
                    );
                    self.recorder.record(line, since_previous)?;
                    records += 1;
                }
            }
        }

        self.state = SessionState::Closed;
        let summary = SessionSummary {
            handshake_attempts: self.handshake_attempts,
            records,
            streaming_time: started.elapsed(),
        };
        info!(records, "Received close message, session finished");
        Ok(summary)
    }

    fn expect_state(&self, allowed: &[SessionState]) -> ScanResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ScanError::InvalidState {
                expected: allowed
                    .iter()
                    .map(SessionState::as_str)
                    .collect::<Vec<_>>()
                    .join(" or "),
                actual: self.state.as_str(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::storage::MemoryRecorder;
    use crate::transport::MockDevice;

    fn session(device: &MockDevice) -> Session<MockDevice, MemoryRecorder> {
        Session::new(
            device.clone(),
            MemoryRecorder::new(),
            ScanConfiguration::new(170.0, 70.0, 1.0, 1.0),
        )
        .with_timing(SessionTiming::immediate())
    }

    fn count(lines: &[String], wanted: &str) -> usize {
        lines.iter().filter(|l| l.as_str() == wanted).count()
    }

    #[test]
    fn test_handshake_sends_n_requests_then_one_ack() {
        for n in [1u32, 2, 7] {
            let device = MockDevice::new().confirm_on_request(n);
            let mut session = session(&device);

            assert_eq!(session.handshake().unwrap(), n);
            assert_eq!(session.state(), SessionState::ConfigSending);

            let written = device.written_lines();
            assert_eq!(count(&written, CONNECTION_REQUEST), n as usize);
            assert_eq!(count(&written, CONNECTION_ACKNOWLEDGEMENT), 1);
            assert_eq!(written.last().map(String::as_str), Some(CONNECTION_ACKNOWLEDGEMENT));
        }
    }

    #[test]
    fn test_handshake_never_confirmed_makes_no_progress() {
        let device = MockDevice::new().never_confirm();
        let mut session = session(&device).with_retry_policy(RetryPolicy::bounded(25));

        match session.handshake() {
            Err(ScanError::HandshakeExhausted { attempts }) => assert_eq!(attempts, 25),
            other => panic!("unexpected handshake result: {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Handshaking);
        assert_eq!(device.requests_seen(), 25);
        assert_eq!(count(&device.written_lines(), CONNECTION_ACKNOWLEDGEMENT), 0);
        assert!(matches!(
            session.send_configuration(),
            Err(ScanError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_configuration_written_in_declared_order() {
        let device = MockDevice::new();
        let configuration = ScanConfiguration::new(120.0, 60.0, 2.0, 0.5)
            .with_metadata("aaa_sorts_first", serde_json::json!(1.0))
            .with_metadata("sphere_diameter_mm", serde_json::json!(40.0));
        let mut session = Session::new(device.clone(), MemoryRecorder::new(), configuration)
            .with_timing(SessionTiming::immediate());

        session.handshake().unwrap();
        session.send_configuration().unwrap();

        let written = device.written_lines();
        let after_ack: Vec<&str> = written
            .iter()
            .skip_while(|l| l.as_str() != CONNECTION_ACKNOWLEDGEMENT)
            .skip(1)
            .map(String::as_str)
            .collect();
        assert_eq!(after_ack, vec!["120.0", "60.0", "2.0", "0.5"]);
        assert_eq!(device.received_configuration(), vec![120.0, 60.0, 2.0, 0.5]);
        assert_eq!(session.state(), SessionState::AwaitingStart);
        assert!(session.recorder().configuration().is_some());
    }

    #[test]
    fn test_invalid_configuration_writes_nothing() {
        let device = MockDevice::new();
        let mut session = Session::new(
            device.clone(),
            MemoryRecorder::new(),
            ScanConfiguration::new(170.0, 0.0, 1.0, 1.0),
        )
        .with_timing(SessionTiming::immediate());

        session.handshake().unwrap();
        let before = device.written_lines().len();
        assert!(matches!(
            session.send_configuration(),
            Err(ScanError::Configuration(_))
        ));
        assert_eq!(device.written_lines().len(), before);
        assert_eq!(session.state(), SessionState::ConfigSending);
    }

    #[test]
    fn test_stream_forwards_k_records_until_sentinel() {
        let records = ["0,0,48.5", "1,0,47.25", "2,0,46"];
        let device = MockDevice::new().with_records(records);
        let mut session = session(&device);

        let summary = session.run().unwrap();
        assert_eq!(summary.records, 3);
        assert_eq!(summary.handshake_attempts, 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.recorder().lines(), records);
        assert_eq!(device.written_lines().last().map(String::as_str), Some(START_COMMAND));
    }

    #[test]
    fn test_no_reads_after_sentinel() {
        let mut device = MockDevice::new().with_records(["1,1,1"]);
        let mut session = session(&device);
        session.run().unwrap();

        // Anything queued behind the sentinel stays unread
        device.write_line(START_COMMAND).unwrap();
        let pending = device.pending_lines();
        assert_eq!(pending, 2);
        assert!(matches!(session.stream(), Err(ScanError::InvalidState { .. })));
        assert_eq!(device.pending_lines(), pending);
    }

    #[test]
    fn test_malformed_lines_are_persisted_verbatim() {
        let device = MockDevice::new().with_records(["1,2,3", "not a record", "4,,", ""]);
        let mut session = session(&device);

        let summary = session.run().unwrap();
        assert_eq!(summary.records, 4);
        assert_eq!(
            session.recorder().lines(),
            vec!["1,2,3", "not a record", "4,,", ""]
        );
    }

    #[test]
    fn test_disconnect_mid_stream_is_fatal() {
        let device = MockDevice::new()
            .with_records(["0,0,1", "1,0,1"])
            .without_close();
        let mut session = session(&device);

        let err = session.run().unwrap_err();
        assert!(matches!(err, ScanError::TransportClosed));
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.recorder().lines().len(), 2);
    }

    #[test]
    fn test_phases_out_of_order_are_rejected() {
        let device = MockDevice::new();
        let mut session = session(&device);

        match session.start() {
            Err(ScanError::InvalidState { expected, actual }) => {
                assert_eq!(expected, "awaiting_start");
                assert_eq!(actual, "idle");
            }
            other => panic!("unexpected start result: {:?}", other),
        }
        assert!(matches!(session.stream(), Err(ScanError::InvalidState { .. })));
        assert!(device.written_lines().is_empty());
    }

    #[test]
    fn test_invalid_state_lists_every_allowed_phase() {
        let device = MockDevice::new().with_records(["0,0,1"]).without_close();
        let mut session = session(&device);
        session.handshake().unwrap();
        session.send_configuration().unwrap();
        session.start().unwrap();

        let err = session.handshake().unwrap_err();
        match &err {
            ScanError::InvalidState { expected, actual } => {
                assert_eq!(expected, "idle or handshaking");
                assert_eq!(*actual, "streaming");
            }
            other => panic!("unexpected handshake error: {:?}", other),
        }
        assert!(err.to_string().contains("expected 'idle or handshaking'"));
    }

    #[test]
    fn test_from_settings_applies_retry_bound() {
        let mut settings = Settings::default();
        settings.serial.boot_delay_ms = 0;
        settings.serial.start_delay_ms = 0;
        settings.serial.handshake_max_attempts = Some(3);

        let device = MockDevice::new().never_confirm();
        let mut session = Session::from_settings(device.clone(), MemoryRecorder::new(), &settings);
        assert!(matches!(
            session.handshake(),
            Err(ScanError::HandshakeExhausted { attempts: 3 })
        ));
        assert_eq!(device.requests_seen(), 3);
    }
}
