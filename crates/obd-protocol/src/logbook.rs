//! Reading decoded values back out of an event log file

use crate::sink::EventCategory;
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::path::Path;

const MESSAGE_PREFIX: &str = "Msg Id: ";
const VALUE_SEPARATOR: &str = ") - Value = ";
/// Accepts any number of fractional digits
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One decoded value recovered from a `PARSER` log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedReading {
    pub pid: u8,
    /// Seconds since local midnight
    pub local_time_secs: f64,
    pub description: String,
    pub value: f64,
}

/// Message text written for a successful decode
pub fn reading_message(pid: u8, description: &str, value: f64) -> String {
    format!(
        "{}{} ({}{}{}",
        MESSAGE_PREFIX, pid, description, VALUE_SEPARATOR, value
    )
}

/// Parse one log line; `None` unless it is a well-formed decode record
pub fn parse_line(line: &str) -> Option<LoggedReading> {
    let mut fields = line.splitn(3, '\t');
    let timestamp = fields.next()?;
    if fields.next()? != EventCategory::Parser.as_str() {
        return None;
    }
    let message = fields.next()?.strip_prefix(MESSAGE_PREFIX)?;

    let (pid, rest) = message.split_once(" (")?;
    let (description, value) = rest.rsplit_once(VALUE_SEPARATOR)?;

    let time = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_PARSE_FORMAT)
        .ok()?
        .time();
    let local_time_secs =
        f64::from(time.num_seconds_from_midnight()) + f64::from(time.nanosecond()) / 1e9;

    Some(LoggedReading {
        pid: pid.trim().parse().ok()?,
        local_time_secs,
        description: description.to_string(),
        value: value.trim().parse().ok()?,
    })
}

/// Collect every decode record in a log text, skipping everything else
pub fn parse_log(text: &str) -> Vec<LoggedReading> {
    text.lines().filter_map(parse_line).collect()
}

/// Read and parse an event log file
pub fn parse_log_file(path: impl AsRef<Path>) -> std::io::Result<Vec<LoggedReading>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_log(&text))
}
