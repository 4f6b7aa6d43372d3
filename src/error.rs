//! Custom error types for the application.
//!
//! This module defines the primary error type, `ScanError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle everything from serial channel failures to numeric invariants violated
//! during analysis.
//!
//! ## Error Hierarchy
//!
//! `ScanError` groups its variants by the stage that raises them:
//!
//! - **Transport** (`Transport`, `TransportClosed`, `ReadTimeout`, `SerialFeatureDisabled`):
//!   the channel to the device failed. These are fatal for a session and are never retried.
//! - **Protocol** (`HandshakeExhausted`, `InvalidState`): the session state machine refused
//!   to advance, either because a bounded retry policy ran out or because a phase was
//!   invoked out of order.
//! - **Reconstruction / analysis** (`EmptyInput`, `DegenerateMass`, `MalformedRecord`,
//!   `InvalidQuantity`): the numeric pipeline rejects input instead of producing NaN or
//!   an empty grid. Each message names the invariant that was violated.
//! - **Ambient** (`Csv`, `Serialization`, `Config`, `Configuration`): storage,
//!   serialization and configuration failures.
//!
//! By using `#[from]`, `ScanError` can be created from the underlying error types,
//! so the `?` operator works throughout the crate.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Errors raised anywhere in the acquisition and analysis pipeline.
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Unexpected EOF from serial port (device disconnected)")]
    TransportClosed,

    #[error("No complete line received within {timeout_ms} ms")]
    ReadTimeout { timeout_ms: u64 },

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("Handshake not confirmed after {attempts} connection requests")]
    HandshakeExhausted { attempts: u32 },

    #[error("Session is in state '{actual}', expected '{expected}'")]
    InvalidState {
        expected: String,
        actual: &'static str,
    },

    #[error("no samples: cannot reconstruct a grid from an empty input")]
    EmptyInput,

    #[error("zero total mass: {}", mass_reason(.cancelled))]
    DegenerateMass { cancelled: bool },

    #[error("Malformed record at row {row}: {reason}")]
    MalformedRecord { row: usize, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Invalid physical quantity: {0}")]
    InvalidQuantity(String),
}

fn mass_reason(cancelled: &bool) -> &'static str {
    if *cancelled {
        "positive and negative heights cancel out, center of mass is undefined"
    } else {
        "center of mass is undefined for a surface with no height"
    }
}

impl ScanError {
    /// Whether the error came from the device channel.
    ///
    /// Transport errors end an acquisition session; everything else is raised
    /// before or after the channel is in use.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ScanError::Transport(_)
                | ScanError::TransportClosed
                | ScanError::ReadTimeout { .. }
                | ScanError::SerialFeatureDisabled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_errors_name_the_violated_invariant() {
        assert!(ScanError::EmptyInput.to_string().contains("no samples"));
        let flat = ScanError::DegenerateMass { cancelled: false }.to_string();
        let cancelled = ScanError::DegenerateMass { cancelled: true }.to_string();
        assert!(flat.contains("zero total mass"));
        assert!(flat.contains("no height"));
        assert!(cancelled.contains("zero total mass"));
        assert!(cancelled.contains("cancel"));
    }

    #[test]
    fn io_errors_convert_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
        let err: ScanError = io.into();
        assert!(err.is_transport());
        assert!(err.to_string().contains("unplugged"));
    }

    #[test]
    fn analysis_errors_are_not_transport() {
        assert!(!ScanError::EmptyInput.is_transport());
        assert!(!ScanError::HandshakeExhausted { attempts: 3 }.is_transport());
    }
}
