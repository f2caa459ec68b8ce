//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur during OBD-II communication
#[derive(Debug, Error)]
pub enum ObdError {
    /// Session has no open transport
    #[error("No transport: serial port is not open")]
    NoTransport,

    /// Serial port connection error
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Timeout waiting for response
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// Invalid response from adapter
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Response could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

/// Errors raised while turning a response frame into a reading
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Frame was cut short by a timeout before the prompt arrived
    #[error("Frame truncated before prompt")]
    Truncated,

    /// No payload segment after the echoed command
    #[error("Missing payload segment")]
    MissingPayload,

    /// A token is not a hex byte
    #[error("Invalid hex byte: {0:?}")]
    InvalidHex(String),

    /// Not enough bytes for the envelope or the declared width
    #[error("Response too short: needed {needed} bytes, got {got}")]
    TooShort { needed: usize, got: usize },

    /// Response carries a different PID than the one requested
    #[error("Response is for PID {echoed:02X}, requested {requested:02X}")]
    PidMismatch { requested: u8, echoed: u8 },

    /// PID has no row in the descriptor table
    #[error("PID {0:02X} not in descriptor table")]
    UnknownPid(u8),
}

/// Errors from the event log sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log sink already closed")]
    Closed,
}

/// Errors while loading a PID descriptor table
#[derive(Debug, Error)]
pub enum PidTableError {
    #[error("Cannot read PID table: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse PID table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("PID {pid:02X}: unsupported byte width {width} (expected 1, 2 or 4)")]
    InvalidWidth { pid: u8, width: u8 },

    #[error("PID {0:02X} listed more than once")]
    Duplicate(u8),
}
