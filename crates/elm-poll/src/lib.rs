//! ELM327 Poller
//!
//! Opens the adapter, runs the reset/protocol-select bring-up and polls the
//! configured Mode 01 PIDs for a fixed duration, writing every exchange to the
//! event log.

pub mod config;

use crate::config::AppConfig;
use anyhow::Context;
use chrono::Local;
use obd_protocol::logbook::{self, LoggedReading};
use obd_protocol::{default_log_file_name, FileSink, ObdClient, PidDecoder, PidTable};
use obd_scheduler::{PidPoller, PollSummary, SignalOutcome};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_serial::SerialStream;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Readings buffered between the poller and the reporter
const READINGS_CHANNEL_CAPACITY: usize = 256;

/// Initialize logging
pub fn init_logging(level: Level) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

/// PID table from the configured file, or the built-in one
pub fn load_pid_table(config: &AppConfig) -> anyhow::Result<Arc<PidTable>> {
    let table = match &config.pid_table {
        Some(path) => PidTable::from_json_file(path)
            .with_context(|| format!("loading PID table {}", path.display()))?,
        None => PidTable::standard(),
    };
    Ok(Arc::new(table))
}

/// Open the serial adapter and run a full polling session
pub async fn run(config: AppConfig) -> anyhow::Result<PollSummary> {
    let table = load_pid_table(&config)?;

    let log_path = config
        .log_file
        .clone()
        .unwrap_or_else(|| default_log_file_name(Local::now()).into());
    let sink = FileSink::open(&log_path)
        .with_context(|| format!("opening event log {}", log_path.display()))?;

    let mut client: ObdClient<SerialStream> =
        ObdClient::new(&config.device, config.client_config()?, Box::new(sink));
    client
        .open(config.baud_rate)
        .with_context(|| format!("opening {}", config.device))?;

    let summary = drive(&mut client, &config, table).await;
    client.close().await;
    summary
}

/// Bring up the adapter and poll over an already constructed session
pub async fn drive<T>(
    client: &mut ObdClient<T>,
    config: &AppConfig,
    table: Arc<PidTable>,
) -> anyhow::Result<PollSummary>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    client.initialize().await.context("adapter bring-up")?;

    let decoder = PidDecoder::new(table, config.envelope).with_terminator(client.config().terminator);
    let (tx, mut rx) = mpsc::channel(READINGS_CHANNEL_CAPACITY);
    let mut poller = PidPoller::new(decoder, config.poller_config()).with_readings(tx);

    let reporter = tokio::spawn(async move {
        let mut count = 0u64;
        while let Some(reading) = rx.recv().await {
            count += 1;
            info!(
                pid = reading.pid,
                ack = reading.ack,
                "{} = {}",
                reading.description,
                reading.value
            );
        }
        count
    });

    if let Some(pid) = config.probe_pid {
        match poller.poll_signal(client, pid, false).await {
            Ok(SignalOutcome::Raw(frame)) if !frame.is_complete() => {
                warn!("Probe of PID {:02X} got no prompt", pid)
            }
            Ok(_) => info!("Probe of PID {:02X} answered", pid),
            Err(e) => warn!("Probe of PID {:02X} failed: {}", pid, e),
        }
    }

    for &pid in &config.poll_pids {
        poller.add(client, pid);
    }

    let summary = poller
        .run(client, config.poll_duration(), config.decode)
        .await;

    drop(poller);
    match reporter.await {
        Ok(count) => info!("Reported {} readings", count),
        Err(e) => warn!("Reading reporter failed: {}", e),
    }

    Ok(summary)
}

/// Per-PID statistics of the readings found in an event log
#[derive(Debug, Clone, PartialEq)]
pub struct PidReport {
    pub description: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub last: f64,
}

/// Summarize decoded readings recorded in an event log, keyed by PID
pub fn report_log(path: &Path) -> anyhow::Result<BTreeMap<u8, PidReport>> {
    let readings = logbook::parse_log_file(path)
        .with_context(|| format!("reading event log {}", path.display()))?;
    Ok(summarize(&readings))
}

fn summarize(readings: &[LoggedReading]) -> BTreeMap<u8, PidReport> {
    let mut report: BTreeMap<u8, PidReport> = BTreeMap::new();
    for reading in readings {
        report
            .entry(reading.pid)
            .and_modify(|r| {
                r.count += 1;
                r.min = r.min.min(reading.value);
                r.max = r.max.max(reading.value);
                r.last = reading.value;
            })
            .or_insert_with(|| PidReport {
                description: reading.description.clone(),
                count: 1,
                min: reading.value,
                max: reading.value,
                last: reading.value,
            });
    }
    report
}
