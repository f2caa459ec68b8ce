//! ELM327 Poller - Main Entry Point
//!
//! Usage:
//! - `elm-poll [config.toml]` polls the adapter
//! - `elm-poll report <event-log>` summarizes the readings in an event log

use anyhow::Context;
use elm_poll::config::AppConfig;
use elm_poll::{init_logging, report_log, run};
use std::path::Path;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("report") {
        let log = args.get(1).context("usage: elm-poll report <event-log>")?;
        init_logging(AppConfig::default().log_level()?)?;
        for (pid, r) in report_log(Path::new(log))? {
            info!(
                "PID {:02X} ({}): {} readings, min {}, max {}, last {}",
                pid, r.description, r.count, r.min, r.max, r.last
            );
        }
        return Ok(());
    }

    let config = AppConfig::load(args.first().map(String::as_str))?;
    init_logging(config.log_level()?)?;

    info!("=== ELM327 Poller v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Polling {:?} on {} for {}s",
        config.poll_pids, config.device, config.poll_duration_secs
    );

    let summary = run(config).await?;
    info!(
        "Done: {} sweeps, {} exchanges, {} decoded, {} decode failures, {} errors",
        summary.sweeps, summary.exchanges, summary.decoded, summary.decode_failures, summary.errors
    );

    Ok(())
}
