mod cli;
mod logging;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use unmonitarr_core::{
    load_config, metrics, validate_config, JsonStateStore, SanitizedConfig, ScanMode, ScanReport,
    Scanner, StateHandle,
};

use cli::Cli;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    cli.apply(&mut config);

    let _log_guard = logging::init(&config.logging, cli.verbose);
    info!(version = VERSION, config = ?cli.config, "Starting unmonitarr");

    validate_config(&config).context("Configuration validation failed")?;
    info!(config = ?SanitizedConfig::from(&config), "Configuration loaded");

    let shutdown = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown requested, finishing in-flight work");
            shutdown.store(true, Ordering::SeqCst);
            let _ = shutdown_tx.send(true);
        });
    }

    let store = Arc::new(JsonStateStore::new(&config.state.path));
    let state = StateHandle::load(store, config.general.dry_run);
    info!(path = ?config.state.path, dry_run = state.is_dry_run(), "State loaded");

    let scanner = Scanner::from_config(&config, state, shutdown.clone())
        .context("Failed to create scanner")?;
    let textfile = config.metrics.textfile.as_deref();

    if !cli.monitor {
        let report = scanner
            .run(ScanMode::Full, cli.force_full_scan)
            .await
            .context("Scan failed")?;
        export_metrics(textfile);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let interval = Duration::from_secs(config.monitor.interval_secs);
    let error_retry = Duration::from_secs(config.monitor.error_retry_secs);
    let mut force_full = cli.force_full_scan;
    info!(interval_secs = interval.as_secs(), "Monitor mode enabled");

    loop {
        let started = Instant::now();
        let delay = match scanner.run(ScanMode::Incremental, force_full).await {
            Ok(report) => {
                force_full = false;
                export_metrics(textfile);
                log_report(&report);
                interval
                    .saturating_sub(started.elapsed())
                    .max(Duration::from_secs(1))
            }
            Err(e) => {
                error!(error = %e, retry_secs = error_retry.as_secs(), "Scan failed");
                error_retry
            }
        };

        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        info!(next_scan_secs = delay.as_secs(), "Waiting for next scan");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn log_report(report: &ScanReport) {
    info!(
        unmonitored = report.total_unmonitored(),
        interrupted = report.interrupted,
        duration_ms = report.duration_ms,
        "Scan finished"
    );
}

/// Write the metrics for a node-exporter textfile collector, if configured.
fn export_metrics(path: Option<&Path>) {
    let Some(path) = path else {
        return;
    };
    if let Err(e) = write_textfile(path) {
        warn!(path = ?path, error = %e, "Failed to write metrics textfile");
    }
}

fn write_textfile(path: &Path) -> Result<()> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, metrics::encode_metrics())
        .with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to rename {:?}", tmp))?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
