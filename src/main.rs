//! `hvmond` — runs the HV engine from a YAML config, streams telemetry
//! records as JSON lines through the log, and shuts down cleanly on
//! ctrl-c.

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::LevelFilter;
use mppc_hv::sink::{BroadcastTelemetry, LogActionSink};
use mppc_hv::{EngineConfig, PortManager};
use std::ops::Deref;
use std::panic;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "hvmond", about = "MPPC HV module monitoring daemon")]
struct CliOptions {
    /// Path to the engine configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn logging_init(verbose: u8) -> Result<LoggerHandle> {
    let log_level = match verbose {
        0 => LevelFilter::Info.as_str(),
        1 => LevelFilter::Debug.as_str(),
        _ => LevelFilter::Trace.as_str(),
    };
    let log_handle = Logger::try_with_env_or_str(log_level)
        .context("Cannot init logging")?
        .start()
        .context("Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });
        log::error!("Panicked at {}:{}:{}: {}", filename, line, column, cause);
    }));
    Ok(log_handle)
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = CliOptions::parse();
    let _log_handle = logging_init(options.verbose)?;

    let config = EngineConfig::from_yaml_file(&options.config)
        .with_context(|| format!("Cannot load config from {}", options.config.display()))?;
    log::info!(
        "Starting with {} port(s): {:?}",
        config.ports.len(),
        config.ports.iter().map(|p| p.id).collect::<Vec<_>>()
    );

    let telemetry = Arc::new(BroadcastTelemetry::new(256));
    let manager = Arc::new(
        PortManager::new(
            &config,
            Arc::new(LogActionSink),
            vec![telemetry.clone()],
        )
        .context("Cannot build port manager")?,
    );

    // Stream every telemetry record as one JSON line.
    let mut records = telemetry.subscribe();
    let stream_task = tokio::spawn(async move {
        loop {
            match records.recv().await {
                Ok(record) => match serde_json::to_string(&record) {
                    Ok(line) => log::info!("telemetry {}", line),
                    Err(e) => log::error!("Cannot serialize telemetry record: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("Telemetry consumer lagged; {} records dropped", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    manager.start();
    log::info!("Polling started; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Cannot listen for ctrl-c")?;
    log::info!("Stopping...");

    manager.shutdown().await;
    stream_task.abort();
    Ok(())
}
