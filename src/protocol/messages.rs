//! Protocol message catalog.
//!
//! ## Wire format
//!
//! ASCII, one message per line, newline-terminated. Lines from the device may
//! carry a trailing carriage return, which is stripped before any comparison.
//!
//! | Direction | Literal | Meaning |
//! |---|---|---|
//! | host → device | `connection request` | handshake step 1 |
//! | device → host | `connection confirmation` | handshake step 2 (exact match) |
//! | host → device | `connection acknowledgement` | handshake step 3 |
//! | host → device | decimal value | one configuration parameter, positional |
//! | host → device | `__start__` | begin streaming |
//! | device → host | `x,y,z` | one sample record |
//! | device → host | `__close__` | end of stream |

/// Handshake step 1 (host to device).
pub const CONNECTION_REQUEST: &str = "connection request";

/// Handshake step 2 (device to host).
pub const CONNECTION_CONFIRMATION: &str = "connection confirmation";

/// Handshake step 3 (host to device).
pub const CONNECTION_ACKNOWLEDGEMENT: &str = "connection acknowledgement";

/// Begins streaming (host to device).
pub const START_COMMAND: &str = "__start__";

/// End-of-stream sentinel (device to host).
pub const CLOSE_SENTINEL: &str = "__close__";

/// Header line of the persisted sample log.
pub const SAMPLE_LOG_HEADER: &str = "x [mm],y [mm],z [mm]";

/// A line read during streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine<'a> {
    /// Anything that is not the sentinel, line ending removed. Content is not
    /// validated here.
    Record(&'a str),
    /// The `__close__` sentinel.
    Close,
}

/// Remove trailing `\n` and `\r` characters.
pub fn strip_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// Classify a raw streamed line by exact sentinel comparison.
pub fn classify(raw: &str) -> StreamLine<'_> {
    let line = strip_line_ending(raw);
    if line == CLOSE_SENTINEL {
        StreamLine::Close
    } else {
        StreamLine::Record(line)
    }
}

/// Whether a handshake reply is the exact confirmation.
pub fn is_confirmation(raw: &str) -> bool {
    strip_line_ending(raw) == CONNECTION_CONFIRMATION
}

/// Render a configuration value as decimal text.
///
/// Values always carry a fractional part (`170` is sent as `170.0`), which is
/// what the firmware's float parser was written against.
pub fn format_value(value: f64) -> String {
    let text = value.to_string();
    if value.is_finite() && !text.contains('.') {
        format!("{}.0", text)
    } else {
        text
    }
}
