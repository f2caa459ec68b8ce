//! Prompt-terminated response framing
//!
//! The ELM327 signals the end of every response by sending the prompt byte
//! (`>`). Frames are read one byte at a time. A byte wait that runs past the
//! per-byte timeout is retried until the accumulated frame budget is spent,
//! so a slow reply (`SEARCHING...` during protocol detection) still ends up
//! in the frame it belongs to instead of leaking into the next exchange.

use crate::error::ObdError;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Default prompt sentinel
pub const DEFAULT_PROMPT: u8 = b'>';

/// Default command terminator
pub const DEFAULT_TERMINATOR: u8 = b'\r';

/// Placeholder for the terminator in logged frames
const LOG_TERMINATOR_PLACEHOLDER: char = '_';

/// Why frame accumulation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEnd {
    /// Prompt byte received
    Prompt,
    /// Budget spent while the device was silent for at least the read timeout
    Timeout,
    /// Budget spent while bytes were still arriving
    BudgetSpent,
    /// Frame reached the maximum length without a prompt
    Overflow,
    /// Transport closed
    Eof,
}

/// Undecoded response text captured up to the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Received text, prompt included when the frame is complete
    pub text: String,
    /// How the read ended
    pub end: FrameEnd,
}

impl RawFrame {
    /// True when the prompt byte terminated the frame
    pub fn is_complete(&self) -> bool {
        self.end == FrameEnd::Prompt
    }

    /// Copy of the text with every terminator replaced by `_`
    pub fn log_repr(&self, terminator: u8) -> String {
        log_text(&self.text, terminator)
    }
}

/// `text` with every terminator replaced by `_`
pub fn log_text(text: &str, terminator: u8) -> String {
    text.replace(char::from(terminator), &LOG_TERMINATOR_PLACEHOLDER.to_string())
}

/// Reads single frames off a byte stream
#[derive(Debug, Clone)]
pub struct FrameReader {
    /// Sentinel ending a frame
    pub prompt: u8,
    /// Wait per byte
    pub byte_timeout: Duration,
    /// Wait for the whole frame
    pub budget: Duration,
    /// Largest frame accepted
    pub max_len: usize,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT,
            byte_timeout: Duration::from_secs(2),
            budget: Duration::from_secs(5),
            max_len: 4096,
        }
    }
}

impl FrameReader {
    /// Accumulate bytes until the prompt, the budget or the length cap
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<RawFrame, ObdError>
    where
        R: AsyncRead + Unpin,
    {
        let started = Instant::now();
        let mut last_byte = started;
        let mut buf = Vec::with_capacity(64);

        let end = loop {
            if buf.len() >= self.max_len {
                break FrameEnd::Overflow;
            }

            let remaining = self.budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break self.budget_end(last_byte);
            }

            match timeout(self.byte_timeout.min(remaining), reader.read_u8()).await {
                Ok(Ok(byte)) => {
                    last_byte = Instant::now();
                    buf.push(byte);
                    if byte == self.prompt {
                        break FrameEnd::Prompt;
                    }
                }
                Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => break FrameEnd::Eof,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => debug!(
                    "No byte within {:?}, {} bytes so far, retrying",
                    self.byte_timeout,
                    buf.len()
                ),
            }
        };

        if end != FrameEnd::Prompt {
            warn!(
                "Frame ended without prompt ({:?}) after {} bytes",
                end,
                buf.len()
            );
        } else {
            debug!("Frame complete: {} bytes", buf.len());
        }

        Ok(RawFrame {
            text: String::from_utf8_lossy(&buf).into_owned(),
            end,
        })
    }

    fn budget_end(&self, last_byte: Instant) -> FrameEnd {
        if last_byte.elapsed() >= self.byte_timeout {
            FrameEnd::Timeout
        } else {
            FrameEnd::BudgetSpent
        }
    }

    /// Take whatever input is already buffered without waiting for more.
    ///
    /// Bytes left over from a reply that arrived after its frame gave up are
    /// returned here, so they cannot be read as the answer to a later command.
    pub async fn drain<R>(&self, reader: &mut R) -> Result<Vec<u8>, ObdError>
    where
        R: AsyncRead + Unpin,
    {
        let mut stale = Vec::new();
        let mut chunk = [0u8; 256];

        while stale.len() < self.max_len {
            match timeout(Duration::ZERO, reader.read(&mut chunk)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => stale.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        if !stale.is_empty() {
            warn!("Discarding {} stale bytes", stale.len());
        }
        Ok(stale)
    }
}
