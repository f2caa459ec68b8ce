//! OBD-II Client for ELM327 Adapters
//!
//! One client is one device session: it owns the transport, writes
//! terminated commands and reads prompt-terminated frames back. Every
//! command and frame is recorded to the injected event sink.

use crate::error::ObdError;
use crate::frame::{log_text, FrameReader, RawFrame, DEFAULT_PROMPT, DEFAULT_TERMINATOR};
use crate::pid::mode01_request;
use crate::protocol::{ObdProtocol, RESET_COMMAND};
use crate::sink::{EventCategory, EventSink};
use chrono::Local;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, warn};

/// Default per-byte read timeout
const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default budget for reading one whole frame
const DEFAULT_FRAME_BUDGET_MS: u64 = 5000;

/// Default cap on frame length
const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// Default ELM327 serial speed
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Session parameters
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Byte appended to each command
    pub terminator: u8,
    /// Byte ending each response
    pub prompt: u8,
    /// Wait per received byte
    pub read_timeout: Duration,
    /// Wait per whole frame
    pub frame_budget: Duration,
    /// Largest accepted frame
    pub max_frame_len: usize,
    /// Protocol selected during bring-up
    pub protocol: ObdProtocol,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            terminator: DEFAULT_TERMINATOR,
            prompt: DEFAULT_PROMPT,
            read_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            frame_budget: Duration::from_millis(DEFAULT_FRAME_BUDGET_MS),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            protocol: ObdProtocol::Auto,
        }
    }
}

impl ClientConfig {
    fn frame_reader(&self) -> FrameReader {
        FrameReader {
            prompt: self.prompt,
            byte_timeout: self.read_timeout,
            budget: self.frame_budget,
            max_len: self.max_frame_len,
        }
    }
}

/// OBD-II client for communicating with ELM327-compatible adapters
pub struct ObdClient<T> {
    /// Serial port device path (e.g., "/dev/ttyUSB0" or "COM3")
    device: String,
    /// Open transport, `None` while closed
    transport: Option<T>,
    config: ClientConfig,
    reader: FrameReader,
    sink: Box<dyn EventSink>,
}

impl ObdClient<SerialStream> {
    /// Open the serial port for this session
    pub fn open(&mut self, baud_rate: u32) -> Result<(), ObdError> {
        info!("Opening {} at {} baud", self.device, baud_rate);
        let port = tokio_serial::new(&self.device, baud_rate)
            .timeout(self.config.read_timeout)
            .open_native_async()
            .map_err(|e| {
                error!("Failed to open {}: {}", self.device, e);
                ObdError::from(e)
            })?;
        self.attach(port);
        Ok(())
    }
}

impl<T> ObdClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a closed session for a device
    pub fn new(device: &str, config: ClientConfig, sink: Box<dyn EventSink>) -> Self {
        info!("Creating OBD client for device: {}", device);

        let mut client = Self {
            device: device.to_string(),
            transport: None,
            reader: config.frame_reader(),
            config,
            sink,
        };
        client.record(EventCategory::Init, "Object created.");
        client.record(EventCategory::Init, &format!("Serial port set to {}", device));
        client
    }

    /// Create a session over an already open transport
    pub fn with_transport(
        device: &str,
        transport: T,
        config: ClientConfig,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let mut client = Self::new(device, config, sink);
        client.attach(transport);
        client
    }

    /// Install an open transport
    pub fn attach(&mut self, transport: T) {
        self.transport = Some(transport);
        self.record(EventCategory::Open, "Serial port object created.");
    }

    /// Record an event; sink failures are reported but never propagated
    pub fn record(&mut self, category: EventCategory, message: &str) {
        if let Err(e) = self.sink.record(category, message, Local::now()) {
            warn!("Event log write failed ({} {}): {}", category, message, e);
        }
    }

    /// Flush the event sink
    pub fn flush_log(&mut self) {
        if let Err(e) = self.sink.flush() {
            warn!("Event log flush failed: {}", e);
        }
    }

    /// Write a command followed by the terminator; does not wait for a reply.
    ///
    /// Input still pending from an earlier exchange is discarded first and
    /// logged.
    pub async fn write_command(&mut self, command: &str) -> Result<(), ObdError> {
        if self.transport.is_none() {
            self.record(EventCategory::Tx, "Error: Serial Port is undefined.");
            return Err(ObdError::NoTransport);
        }
        let transport = self.transport.as_mut().ok_or(ObdError::NoTransport)?;

        let mut data = Vec::with_capacity(command.len() + 1);
        data.extend_from_slice(command.as_bytes());
        data.push(self.config.terminator);

        debug!("TX {}", command);
        match transmit(&self.reader, transport, &data).await {
            Ok(stale) => {
                if !stale.is_empty() {
                    let text = String::from_utf8_lossy(&stale);
                    self.record(
                        EventCategory::Rx,
                        &format!(
                            "Discarded stale input: {}",
                            log_text(&text, self.config.terminator)
                        ),
                    );
                }
                self.record(EventCategory::Tx, command);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send {}: {}", command, e);
                self.record(
                    EventCategory::Tx,
                    &format!("Error: could not send {}: {}", command, e),
                );
                Err(e)
            }
        }
    }

    /// Read one frame up to the prompt byte
    pub async fn read_frame(&mut self) -> Result<RawFrame, ObdError> {
        if self.transport.is_none() {
            self.record(EventCategory::Rx, "Error: Serial Port is undefined.");
            return Err(ObdError::NoTransport);
        }
        let transport = self.transport.as_mut().ok_or(ObdError::NoTransport)?;

        let frame = match self.reader.read_frame(transport).await {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to read from {}: {}", self.device, e);
                self.record(EventCategory::Rx, &format!("Error: read failed: {}", e));
                return Err(e);
            }
        };
        let logged = frame.log_repr(self.config.terminator);
        if frame.is_complete() {
            self.record(EventCategory::Rx, &logged);
        } else {
            self.record(
                EventCategory::Rx,
                &format!("Incomplete frame ({:?}): {}", frame.end, logged),
            );
        }
        Ok(frame)
    }

    /// One request/response exchange
    pub async fn exchange(&mut self, command: &str) -> Result<RawFrame, ObdError> {
        self.write_command(command).await?;
        self.read_frame().await
    }

    /// Send the reset and protocol-select commands, reading one frame after each
    pub async fn initialize(&mut self) -> Result<(), ObdError> {
        if self.transport.is_none() {
            self.record(
                EventCategory::ElmInit,
                "Error: could not initialize ELM327: serial does not exist.",
            );
            return Err(ObdError::NoTransport);
        }

        info!("Initializing OBD adapter on {}", self.device);
        let select = self.config.protocol.to_elm_command();
        self.exchange(RESET_COMMAND).await?;
        self.exchange(select).await?;
        self.record(
            EventCategory::ElmInit,
            &format!("Device initialized with {} - {} sequence.", RESET_COMMAND, select),
        );
        info!("OBD adapter initialized successfully");
        Ok(())
    }

    /// Request a Mode 01 PID and return the raw response frame
    pub async fn query_pid(&mut self, pid: u8) -> Result<RawFrame, ObdError> {
        debug!("Querying PID {:02X}", pid);
        self.record(EventCategory::PollMng, &format!("Polling id {}.", pid));
        self.exchange(&mode01_request(pid)).await
    }

    /// Check if the transport is open
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Release the transport and flush the event log
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            info!("Closing OBD client on {}", self.device);
            if let Err(e) = transport.shutdown().await {
                warn!("Transport shutdown failed: {}", e);
            }
            self.record(EventCategory::Open, "Serial port closed.");
        }
        self.flush_log();
    }
}

/// Drop pending input, then write and flush `data`; returns the dropped bytes
async fn transmit<T>(
    reader: &FrameReader,
    transport: &mut T,
    data: &[u8],
) -> Result<Vec<u8>, ObdError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let stale = reader.drain(transport).await?;
    transport.write_all(data).await?;
    transport.flush().await?;
    Ok(stale)
}
