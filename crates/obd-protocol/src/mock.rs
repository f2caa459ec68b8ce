//! Scripted ELM327 stand-in for tests and dry runs
//!
//! The mock sits on the far end of an in-memory duplex pipe. It reads
//! `\r`-terminated commands, echoes each one and answers with a canned body
//! followed by a blank line and the `>` prompt, like a real adapter with echo
//! enabled.

use crate::decoder::EnvelopeFormat;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;
use tracing::debug;

/// Header bytes added in front of payloads in long format
const LONG_HEADER: &str = "18 DA F1";
/// Filler byte appended to payloads in long format
const LONG_FOOTER: &str = "00";

/// Scripted adapter
#[derive(Debug, Clone)]
pub struct MockElm327 {
    responses: HashMap<String, String>,
    silent: HashSet<String>,
    delays: HashMap<String, Duration>,
    envelope: EnvelopeFormat,
}

impl Default for MockElm327 {
    fn default() -> Self {
        Self::new()
    }
}

impl MockElm327 {
    /// Adapter answering bring-up and a handful of common PIDs, without headers
    pub fn new() -> Self {
        let responses = [
            ("ATZ", "\rELM327 v1.5"),
            ("ATSP0", "OK"),
            ("0100", "41 00 BE 3F A8 13"),
            ("0104", "41 04 66"),
            ("0105", "41 05 73"),
            ("010C", "41 0C 1A F8"),
            ("010D", "41 0D 28"),
            ("010F", "41 0F 38"),
            ("0110", "41 10 01 F4"),
            ("0111", "41 11 45"),
        ]
        .into_iter()
        .map(|(cmd, body)| (cmd.to_string(), body.to_string()))
        .collect();

        Self {
            responses,
            silent: HashSet::new(),
            delays: HashMap::new(),
            envelope: EnvelopeFormat::Short,
        }
    }

    /// Answer `command` with `body`
    pub fn respond(mut self, command: &str, body: &str) -> Self {
        self.responses
            .insert(command.to_uppercase(), body.to_string());
        self
    }

    /// Never answer `command`
    pub fn silent(mut self, command: &str) -> Self {
        self.silent.insert(command.to_uppercase());
        self
    }

    /// Hold the reply to `command` back for `delay`
    pub fn delay(mut self, command: &str, delay: Duration) -> Self {
        self.delays.insert(command.to_uppercase(), delay);
        self
    }

    /// Wrap Mode 01 payloads in header and footer bytes
    pub fn with_envelope(mut self, envelope: EnvelopeFormat) -> Self {
        self.envelope = envelope;
        self
    }

    fn reply(&self, command: &str) -> Option<String> {
        if self.silent.contains(command) {
            return None;
        }
        let body = match self.responses.get(command) {
            Some(body) if command.starts_with("01") && self.envelope == EnvelopeFormat::Long => {
                format!("{} {} {}", LONG_HEADER, body, LONG_FOOTER)
            }
            Some(body) => body.clone(),
            None => "?".to_string(),
        };
        Some(format!("{}\r{}\r\r>", command, body))
    }

    /// Start answering on a new duplex pipe; returns the client end
    pub fn spawn(self) -> (DuplexStream, MockHandle) {
        let (client_end, device_end) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(device_end);
            let mut reader = BufReader::new(read_half);
            let mut received = Vec::new();
            let mut line = Vec::new();

            loop {
                line.clear();
                match reader.read_until(b'\r', &mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }

                let command = String::from_utf8_lossy(&line).trim().to_uppercase();
                if command.is_empty() {
                    continue;
                }
                debug!("Mock ELM327 RX {}", command);
                let reply = self.reply(&command);
                let delay = self.delays.get(&command).copied();
                received.push(command);

                if let Some(reply) = reply {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    if write_half.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
            received
        });

        (client_end, MockHandle { task })
    }
}

/// Handle to a running mock adapter
pub struct MockHandle {
    task: JoinHandle<Vec<String>>,
}

impl MockHandle {
    /// Commands received, in order; completes once the client end is closed
    pub async fn received(self) -> Vec<String> {
        self.task.await.unwrap_or_default()
    }
}
