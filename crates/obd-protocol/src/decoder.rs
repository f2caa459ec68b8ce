//! Mode 01 Response Decoding
//!
//! Turns the text of a response frame into a [`DecodedReading`] using the
//! PID descriptor table: hex text becomes bytes, the protocol envelope is
//! stripped, the data bytes are packed big-endian and scaled.

use crate::error::DecodeError;
use crate::frame::{RawFrame, DEFAULT_TERMINATOR};
use crate::mode::CURRENT_DATA_ACK;
use crate::pid::PidTable;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Leading envelope bytes dropped in long format
const LONG_FORMAT_HEADER_BYTES: usize = 3;
/// Trailing envelope bytes dropped in long format
const LONG_FORMAT_FOOTER_BYTES: usize = 1;

/// Response envelope convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeFormat {
    /// 3 header bytes and 1 trailing byte wrap the payload
    #[default]
    Long,
    /// Payload starts directly with the mode acknowledgement
    Short,
}

impl EnvelopeFormat {
    fn overhead(&self) -> usize {
        match self {
            EnvelopeFormat::Long => LONG_FORMAT_HEADER_BYTES + LONG_FORMAT_FOOTER_BYTES,
            EnvelopeFormat::Short => 0,
        }
    }

    fn strip<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        match self {
            EnvelopeFormat::Long => {
                &bytes[LONG_FORMAT_HEADER_BYTES..bytes.len() - LONG_FORMAT_FOOTER_BYTES]
            }
            EnvelopeFormat::Short => bytes,
        }
    }
}

/// A physical value decoded from one response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedReading {
    /// PID echoed by the device
    pub pid: u8,
    /// Response carried the Mode 01 acknowledgement (0x41)
    pub ack: bool,
    /// Descriptor text
    pub description: String,
    /// Scaled value
    pub value: f64,
    /// When the reading was decoded
    pub timestamp: DateTime<Local>,
}

/// Table-driven decoder for Mode 01 responses
#[derive(Debug, Clone)]
pub struct PidDecoder {
    table: Arc<PidTable>,
    envelope: EnvelopeFormat,
    terminator: char,
}

impl PidDecoder {
    pub fn new(table: Arc<PidTable>, envelope: EnvelopeFormat) -> Self {
        Self {
            table,
            envelope,
            terminator: char::from(DEFAULT_TERMINATOR),
        }
    }

    /// Use a different line terminator to split frames
    pub fn with_terminator(mut self, terminator: u8) -> Self {
        self.terminator = char::from(terminator);
        self
    }

    pub fn envelope(&self) -> EnvelopeFormat {
        self.envelope
    }

    pub fn table(&self) -> &PidTable {
        &self.table
    }

    /// Decode a frame, rejecting frames that never saw the prompt
    pub fn decode_frame(&self, frame: &RawFrame, pid: u8) -> Result<DecodedReading, DecodeError> {
        if !frame.is_complete() {
            return Err(DecodeError::Truncated);
        }
        self.decode(&frame.text, pid)
    }

    /// Decode response text for the requested PID
    pub fn decode(&self, text: &str, pid: u8) -> Result<DecodedReading, DecodeError> {
        let descriptor = self.table.lookup(pid).ok_or(DecodeError::UnknownPid(pid))?;

        // Segment 0 is the echoed command, the rest is blank lines and the prompt
        let payload = text
            .split(self.terminator)
            .nth(1)
            .ok_or(DecodeError::MissingPayload)?;
        let bytes = parse_hex_bytes(payload)?;

        let width = usize::from(descriptor.byte_width);
        let needed = self.envelope.overhead() + 2 + width;
        if bytes.len() < needed {
            return Err(DecodeError::TooShort {
                needed,
                got: bytes.len(),
            });
        }

        let body = self.envelope.strip(&bytes);
        if body[1] != pid {
            return Err(DecodeError::PidMismatch {
                requested: pid,
                echoed: body[1],
            });
        }
        let raw = pack_big_endian(&body[2..2 + width]);

        Ok(DecodedReading {
            pid,
            ack: body[0] == CURRENT_DATA_ACK,
            description: descriptor.description.clone(),
            value: descriptor.scale(raw),
            timestamp: Local::now(),
        })
    }
}

/// Parse whitespace separated hex bytes, skipping one-character fragments
pub fn parse_hex_bytes(segment: &str) -> Result<Vec<u8>, DecodeError> {
    segment
        .split_whitespace()
        .filter(|token| token.len() > 1)
        .map(parse_hex_byte)
        .collect()
}

fn parse_hex_byte(token: &str) -> Result<u8, DecodeError> {
    // from_str_radix alone would take a sign prefix such as "+F"
    if !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidHex(token.to_string()));
    }
    u8::from_str_radix(token, 16).map_err(|_| DecodeError::InvalidHex(token.to_string()))
}

/// Combine up to four bytes into a big-endian integer
pub fn pack_big_endian(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameEnd;
    use crate::pid::{mode01_request, Pid, PidDescriptor};
    use proptest::prelude::*;

    fn short_decoder() -> PidDecoder {
        PidDecoder::new(Arc::new(PidTable::standard()), EnvelopeFormat::Short)
    }

    fn long_decoder() -> PidDecoder {
        PidDecoder::new(Arc::new(PidTable::standard()), EnvelopeFormat::Long)
    }

    fn table_with(width: u8, multiplier: f64, offset: f64) -> Arc<PidTable> {
        Arc::new(
            PidTable::from_descriptors([PidDescriptor {
                pid: 0x42,
                byte_width: width,
                multiplier,
                offset,
                description: "test".to_string(),
            }])
            .unwrap(),
        )
    }

    fn hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_rpm_short_format() {
        let reading = short_decoder().decode("0C\r41 0C 1A F8\r\r>", 12).unwrap();
        assert!(reading.ack);
        assert_eq!(reading.pid, 0x0C);
        assert_eq!(reading.description, "Engine RPM");
        assert!((reading.value - 1668.0).abs() < 1e-9);
    }

    #[test]
    fn test_rpm_long_format_strips_envelope() {
        let reading = long_decoder()
            .decode("010C\r18 DA F1 41 0C 1A F8 00 \r\r>", 12)
            .unwrap();
        assert!(reading.ack);
        assert!((reading.value - 1668.0).abs() < 1e-9);
    }

    #[test]
    fn test_coolant_long_format() {
        let reading = long_decoder()
            .decode("0105\r18 DA F1 41 05 73 00\r\r>", 5)
            .unwrap();
        assert!((reading.value - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_supported_pids_four_bytes() {
        let reading = short_decoder()
            .decode("0100\r41 00 BE 3F A8 13\r\r>", Pid::SupportedPids.as_hex())
            .unwrap();
        assert_eq!(reading.value, f64::from(0xBE3F_A813u32));
    }

    #[test]
    fn test_unacknowledged_response_still_decodes() {
        let reading = short_decoder().decode("010D\r7F 0D 28\r\r>", 13).unwrap();
        assert!(!reading.ack);
        assert_eq!(reading.value, 40.0);
    }

    #[test]
    fn test_extra_data_bytes_are_ignored() {
        let reading = short_decoder().decode("010D\r41 0D 28 99 99\r\r>", 13).unwrap();
        assert_eq!(reading.value, 40.0);
    }

    #[test]
    fn test_unknown_pid() {
        assert_eq!(
            short_decoder().decode("0133\r41 33 65\r\r>", 0x33),
            Err(DecodeError::UnknownPid(0x33))
        );
    }

    #[test]
    fn test_missing_payload() {
        assert_eq!(
            short_decoder().decode("?>", 12),
            Err(DecodeError::MissingPayload)
        );
    }

    #[test]
    fn test_no_data_is_invalid_hex() {
        assert_eq!(
            short_decoder().decode("010C\rNO DATA\r\r>", 12),
            Err(DecodeError::InvalidHex("NO".to_string()))
        );
    }

    #[test]
    fn test_missing_data_byte() {
        assert_eq!(
            short_decoder().decode("010C\r41 0C 1A\r\r>", 12),
            Err(DecodeError::TooShort { needed: 4, got: 3 })
        );
    }

    #[test]
    fn test_long_format_needs_envelope() {
        assert_eq!(
            long_decoder().decode("010C\r41 0C 1A F8\r\r>", 12),
            Err(DecodeError::TooShort { needed: 8, got: 4 })
        );
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let frame = RawFrame {
            text: "010C\r41 0C 1A".to_string(),
            end: FrameEnd::Timeout,
        };
        assert_eq!(
            short_decoder().decode_frame(&frame, 12),
            Err(DecodeError::Truncated)
        );
    }

    #[test]
    fn test_custom_terminator() {
        let decoder = short_decoder().with_terminator(b'\n');
        let reading = decoder.decode("010D\n41 0D 28\n\n>", 13).unwrap();
        assert_eq!(reading.value, 40.0);
    }

    #[test]
    fn test_reply_for_another_pid_is_rejected() {
        assert_eq!(
            short_decoder().decode("010C\r41 0C 1A F8\r\r>", 0x0D),
            Err(DecodeError::PidMismatch {
                requested: 0x0D,
                echoed: 0x0C
            })
        );
    }

    #[test]
    fn test_signed_token_is_invalid_hex() {
        assert_eq!(
            parse_hex_bytes("41 0D +F"),
            Err(DecodeError::InvalidHex("+F".to_string()))
        );
        assert_eq!(
            short_decoder().decode("010D\r41 0D +F\r\r>", 0x0D),
            Err(DecodeError::InvalidHex("+F".to_string()))
        );
    }

    #[test]
    fn test_single_char_fragments_are_skipped() {
        assert_eq!(parse_hex_bytes(" 41 0C 1A F8 > ").unwrap(), vec![0x41, 0x0C, 0x1A, 0xF8]);
    }

    proptest! {
        #[test]
        fn prop_one_byte_scaling_ignores_envelope(
            b in any::<u8>(),
            header in prop::array::uniform3(any::<u8>()),
            footer in any::<u8>(),
            multiplier in -100.0f64..100.0,
            offset in -1000.0f64..1000.0,
        ) {
            let decoder = PidDecoder::new(table_with(1, multiplier, offset), EnvelopeFormat::Long);
            let bytes = [header[0], header[1], header[2], 0x41, 0x42, b, footer];
            let text = format!("0142\r{}\r\r>", hex(&bytes));
            let reading = decoder.decode(&text, 0x42).unwrap();
            prop_assert_eq!(reading.value, f64::from(b) * multiplier + offset);
        }

        #[test]
        fn prop_two_byte_big_endian(b0 in any::<u8>(), b1 in any::<u8>(), multiplier in -10.0f64..10.0, offset in -100.0f64..100.0) {
            let decoder = PidDecoder::new(table_with(2, multiplier, offset), EnvelopeFormat::Short);
            let text = format!("0142\r{}\r\r>", hex(&[0x41, 0x42, b0, b1]));
            let reading = decoder.decode(&text, 0x42).unwrap();
            let raw = 256.0 * f64::from(b0) + f64::from(b1);
            prop_assert_eq!(reading.value, raw * multiplier + offset);
        }

        #[test]
        fn prop_four_byte_big_endian(bytes in prop::array::uniform4(any::<u8>())) {
            let decoder = PidDecoder::new(table_with(4, 1.0, 0.0), EnvelopeFormat::Short);
            let text = format!("0142\r{}\r\r>", hex(&[0x41, 0x42, bytes[0], bytes[1], bytes[2], bytes[3]]));
            let reading = decoder.decode(&text, 0x42).unwrap();
            let raw = 256f64.powi(3) * f64::from(bytes[0])
                + 256f64.powi(2) * f64::from(bytes[1])
                + 256.0 * f64::from(bytes[2])
                + f64::from(bytes[3]);
            prop_assert_eq!(reading.value, raw);
        }

        #[test]
        fn prop_request_pid_round_trips_through_echo(pid in any::<u8>()) {
            let request = mode01_request(pid);
            let echoed = &request[2..];
            let table = Arc::new(PidTable::from_descriptors([PidDescriptor {
                pid,
                byte_width: 1,
                multiplier: 1.0,
                offset: 0.0,
                description: "echo".to_string(),
            }]).unwrap());
            let decoder = PidDecoder::new(table, EnvelopeFormat::Short);
            let text = format!("{}\r41 {} 00\r\r>", request, echoed);
            prop_assert_eq!(decoder.decode(&text, pid).unwrap().pid, pid);
        }
    }
}
