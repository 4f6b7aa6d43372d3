//! Acquisition protocol: message catalog and session state machine.
pub mod messages;
pub mod session;

pub use session::{RetryPolicy, Session, SessionState, SessionSummary, SessionTiming};
