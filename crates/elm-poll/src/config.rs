//! Poller configuration
//!
//! Layered from built-in defaults, an optional TOML file and `ELM_`-prefixed
//! environment variables (`ELM_DEVICE=/dev/ttyUSB0`, `ELM_POLL_PIDS=12,13`).

use obd_protocol::{ClientConfig, EnvelopeFormat, ObdProtocol, DEFAULT_BAUD_RATE};
use obd_scheduler::{DeadlineCheck, PollerConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

/// Errors while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("{field} must be a single ASCII character, got {value:?}")]
    InvalidByte { field: &'static str, value: String },

    #[error("Unknown log level: {0}")]
    InvalidLevel(String),
}

/// Complete runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial port device path
    pub device: String,
    pub baud_rate: u32,
    /// Per-byte read timeout
    pub read_timeout_ms: u64,
    /// Budget for one whole response frame
    pub frame_budget_ms: u64,
    /// Command terminator character
    pub terminator: String,
    /// Prompt character ending each response
    pub prompt: String,
    pub envelope: EnvelopeFormat,
    pub protocol: ObdProtocol,
    /// PIDs polled each sweep, in order
    pub poll_pids: Vec<u8>,
    /// Single PID polled once before the loop
    pub probe_pid: Option<u8>,
    pub poll_duration_secs: u64,
    /// Decode responses while polling
    pub decode: bool,
    pub deadline_check: DeadlineCheck,
    pub error_backoff_ms: u64,
    /// Event log path; a timestamped name is generated when unset
    pub log_file: Option<PathBuf>,
    /// JSON PID descriptor table; the built-in table is used when unset
    pub pid_table: Option<PathBuf>,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 2000,
            frame_budget_ms: 5000,
            terminator: "\r".to_string(),
            prompt: ">".to_string(),
            envelope: EnvelopeFormat::Long,
            protocol: ObdProtocol::Auto,
            poll_pids: vec![0x0C, 0x0D, 0x10, 0x11],
            probe_pid: None,
            poll_duration_secs: 30,
            decode: true,
            deadline_check: DeadlineCheck::PerSweep,
            error_backoff_ms: 100,
            log_file: None,
            pid_table: None,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(true));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("ELM")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("poll_pids"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Session parameters for the client
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        Ok(ClientConfig {
            terminator: single_byte("terminator", &self.terminator)?,
            prompt: single_byte("prompt", &self.prompt)?,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            frame_budget: Duration::from_millis(self.frame_budget_ms),
            protocol: self.protocol,
            ..Default::default()
        })
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            deadline_check: self.deadline_check,
            error_backoff: Duration::from_millis(self.error_backoff_ms),
        }
    }

    pub fn poll_duration(&self) -> Duration {
        Duration::from_secs(self.poll_duration_secs)
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLevel(self.log_level.clone()))
    }
}

fn single_byte(field: &'static str, value: &str) -> Result<u8, ConfigError> {
    match value.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => Err(ConfigError::InvalidByte {
            field,
            value: value.to_string(),
        }),
    }
}
