//! Protocol Event Log
//!
//! Every transmitted command, received frame, decode outcome and poll list
//! change is recorded to an [`EventSink`]. The sink is injected into the
//! client and has an explicit lifecycle: a [`FileSink`] opens its file once,
//! buffers writes and flushes on [`EventSink::flush`] or drop.

use crate::error::SinkError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Timestamp layout of every log line
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Layout of generated log file names
pub const LOG_FILE_NAME_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

/// Kind of protocol event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Client construction
    Init,
    /// Transport opened or closed
    Open,
    /// Command written
    Tx,
    /// Frame received
    Rx,
    /// Poll list and poll loop management
    PollMng,
    /// Device bring-up
    ElmInit,
    /// Decode outcome
    Parser,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Init => "INIT",
            EventCategory::Open => "OPEN",
            EventCategory::Tx => "TX",
            EventCategory::Rx => "RX",
            EventCategory::PollMng => "POLL_MNG",
            EventCategory::ElmInit => "ELM_INIT",
            EventCategory::Parser => "PARSER",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for protocol events
pub trait EventSink: Send {
    /// Record one event
    fn record(
        &mut self,
        category: EventCategory,
        message: &str,
        timestamp: DateTime<Local>,
    ) -> Result<(), SinkError>;

    /// Push buffered events to their destination
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Format one tab-separated log line (without newline)
pub fn format_line(category: EventCategory, message: &str, timestamp: DateTime<Local>) -> String {
    format!(
        "{}\t{}\t{}",
        timestamp.format(LOG_TIMESTAMP_FORMAT),
        category,
        message
    )
}

/// Log file name derived from a start time, e.g. `2019_11_16_10_00_00_elm.txt`
pub fn default_log_file_name(now: DateTime<Local>) -> String {
    format!("{}_elm.txt", now.format(LOG_FILE_NAME_FORMAT))
}

/// Appends events to a text file, one tab-separated line each
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    /// Open (or create) the log file in append mode
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Event log opened at {}", path.display());
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and release the file; later records fail with [`SinkError::Closed`]
    pub fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!("Event log closed at {}", self.path.display());
        }
        Ok(())
    }
}

impl EventSink for FileSink {
    fn record(
        &mut self,
        category: EventCategory,
        message: &str,
        timestamp: DateTime<Local>,
    ) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        writeln!(writer, "{}", format_line(category, message, timestamp))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        match self.writer.as_mut() {
            Some(writer) => Ok(writer.flush()?),
            None => Err(SinkError::Closed),
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to flush event log {}: {}", self.path.display(), e);
        }
    }
}

/// A recorded event
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub category: EventCategory,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

/// In-memory sink; clones share the same event list
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events
    pub fn events(&self) -> Vec<LogEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Messages recorded under one category, in order
    pub fn messages(&self, category: EventCategory) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.category == category)
            .map(|e| e.message)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn record(
        &mut self,
        category: EventCategory,
        message: &str,
        timestamp: DateTime<Local>,
    ) -> Result<(), SinkError> {
        let mut events = self.events.lock().map_err(|e| {
            SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Lock error: {}", e),
            ))
        })?;
        events.push(LogEvent {
            category,
            message: message.to_string(),
            timestamp,
        });
        Ok(())
    }
}
