//! Error types for the focuser driver.
//!
//! Two layers, both built with `thiserror`:
//!
//! - **`LinkError`**: everything that can go wrong in a single command/response
//!   exchange or while decoding a record. The poller swallows these and retries
//!   on its next tick; user-triggered commands surface them.
//! - **`FocuserError`**: what a driver operation returns. Wraps `LinkError` via
//!   `#[from]` so `?` works across the layers, and adds the driver-level
//!   failures (travel limits, missing connection, wrong device).

use std::time::Duration;
use thiserror::Error;

/// Failure of one exchange on the serial line, or of decoding its record.
#[derive(Error, Debug)]
pub enum LinkError {
    /// The response tag disagrees with the request verb. Treated as a
    /// protocol desync: the record is never parsed further.
    #[error("Response echo '{received}' does not match command verb '{expected}'")]
    EchoMismatch {
        /// Verb of the command that was sent
        expected: char,
        /// First character of the response
        received: char,
    },

    /// Only the line terminator was received.
    #[error("Empty response to '{verb}' command")]
    EmptyResponse {
        /// Verb of the command that was sent
        verb: char,
    },

    /// No terminator observed within the read budget.
    #[error("No response to '{verb}' command within {after:?}")]
    Timeout {
        /// Verb of the command that was sent
        verb: char,
        /// Read budget that elapsed
        after: Duration,
    },

    /// A record has fewer fields than the operation needs.
    #[error("Record '{verb}' has {actual} fields, {required} required")]
    ShortRecord {
        /// Tag of the short record
        verb: char,
        /// Minimum field count needed
        required: usize,
        /// Field count received
        actual: usize,
    },

    /// Encoded command would not fit in the device line buffer.
    #[error("Command of {len} bytes exceeds the {max}-byte line limit")]
    CommandTooLong {
        /// Encoded length including the terminator
        len: usize,
        /// Line limit
        max: usize,
    },

    /// Command text is empty or contains a line terminator.
    #[error("Invalid command text: {0:?}")]
    InvalidCommand(String),

    /// Response filled the line buffer without a terminator.
    #[error("Response exceeded the {max}-byte line limit without a terminator")]
    ResponseTooLong {
        /// Line limit
        max: usize,
    },

    /// The stream reached end-of-file.
    #[error("Serial stream closed")]
    Closed,

    /// A positional field did not hold the expected number.
    #[error("Record '{verb}' field {index} is not numeric: {value:?}")]
    Malformed {
        /// Tag of the record
        verb: char,
        /// Field position
        index: usize,
        /// Raw field text
        value: String,
    },

    /// Underlying stream I/O failed.
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for driver operation results.
pub type FocuserResult<T> = std::result::Result<T, FocuserError>;

/// Error returned by focuser driver operations.
#[derive(Error, Debug)]
pub enum FocuserError {
    /// A protocol exchange failed.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// A move (after backlash adjustment) would leave the travel range.
    /// The whole move is rejected, never clamped.
    #[error("Move to {target} (adjusted {adjusted}) is outside travel range 0..={max}")]
    OutOfRange {
        /// Requested target in steps
        target: i64,
        /// Target after backlash pre-compensation
        adjusted: i64,
        /// Configured maximum position
        max: i64,
    },

    /// The byte stream could not be opened.
    #[error("Failed to open connection: {0}")]
    Connection(String),

    /// No device session is open.
    #[error("Focuser is not connected")]
    NotConnected,

    /// Motion did not finish within the wait limit.
    #[error("Focuser did not settle within {0:?}")]
    NotSettled(std::time::Duration),

    /// The handshake answer did not identify a FocuserLink device.
    #[error("Device not recognized: {0:?}")]
    UnrecognizedDevice(String),

    /// Invalid option or argument.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The config store failed to load or save.
    #[error("Config store error: {0}")]
    Store(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_mismatch_display() {
        let err = LinkError::EchoMismatch {
            expected: 'q',
            received: 'u',
        };
        assert_eq!(
            err.to_string(),
            "Response echo 'u' does not match command verb 'q'"
        );
    }

    #[test]
    fn test_link_error_converts_transparently() {
        let err: FocuserError = LinkError::EmptyResponse { verb: 'H' }.into();
        assert!(matches!(err, FocuserError::Link(LinkError::EmptyResponse { verb: 'H' })));
        assert_eq!(err.to_string(), "Empty response to 'H' command");
    }

    #[test]
    fn test_out_of_range_display() {
        let err = FocuserError::OutOfRange {
            target: 9990,
            adjusted: 10040,
            max: 10000,
        };
        assert!(err.to_string().contains("outside travel range 0..=10000"));
    }
}
