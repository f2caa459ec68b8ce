//! OBD-II Protocol Implementation
//!
//! Serial communication with ELM327-compatible OBD-II adapters: prompt
//! terminated framing, command exchange, and table-driven decoding of
//! Mode 01 responses into physical values.

mod client;
mod decoder;
mod error;
mod frame;
pub mod logbook;
pub mod mock;
mod pid;
mod protocol;
mod sink;

pub use client::{ClientConfig, ObdClient, DEFAULT_BAUD_RATE};
pub use decoder::{pack_big_endian, parse_hex_bytes, DecodedReading, EnvelopeFormat, PidDecoder};
pub use error::{DecodeError, ObdError, PidTableError, SinkError};
pub use frame::{FrameEnd, FrameReader, RawFrame, DEFAULT_PROMPT, DEFAULT_TERMINATOR};
pub use pid::{mode01_request, Pid, PidDescriptor, PidTable};
pub use protocol::{ObdProtocol, RESET_COMMAND};
pub use sink::{
    default_log_file_name, format_line, EventCategory, EventSink, FileSink, LogEvent, MemorySink,
};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Positive response to a current data request
    pub const CURRENT_DATA_ACK: u8 = CURRENT_DATA + 0x40;
}
