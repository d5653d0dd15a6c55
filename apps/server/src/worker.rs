//! Fieldsearch - Schedule Worker Entry Point
//!
//! Polls for due schedules, runs their searches and delivers the reports.
//!
//! Usage:
//!   fieldsearch-worker [--once] [--at 2026-03-02T14:00:00Z] [--interval-seconds 300]

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use fieldsearch::{
    config::Config,
    db::PgDatastore,
    fields::PgCustomFieldStore,
    logging,
    services::ReportExporter,
    state::{build_registry, build_schedule_runner, connect_pool},
    workers::{run_schedule_loop, ScheduleLoopConfig},
};

#[derive(Parser, Debug)]
#[clap(name = "fieldsearch-worker")]
#[clap(about = "Run scheduled searches and deliver their reports")]
struct Args {
    /// Run a single poll and exit
    #[clap(long)]
    once: bool,

    /// Evaluate schedules as of this instant (RFC 3339); only with --once
    #[clap(long, requires = "once")]
    at: Option<DateTime<Utc>>,

    /// Override schedules.poll_interval_seconds
    #[clap(long)]
    interval_seconds: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let _logging_guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = config.logging.deployment_environment,
        once = args.once,
        "Starting fieldsearch worker"
    );

    let pool = connect_pool(&config).await?;

    let registry = Arc::new(build_registry(
        &config,
        Arc::new(PgCustomFieldStore::new(pool.clone())),
    )?);
    let datastore = Arc::new(PgDatastore::new(
        pool.clone(),
        Duration::from_secs(config.schedules.query_timeout_seconds),
    ));
    // Scheduled exports get the longer schedules.query_timeout_seconds.
    let exporter = Arc::new(ReportExporter::new(
        registry,
        datastore,
        config.export_settings(),
    ));
    let runner = build_schedule_runner(pool, &config, exporter);

    if args.once {
        let now = args.at.unwrap_or_else(Utc::now);
        let summary = runner
            .run_due(now)
            .await
            .context("Schedule poll failed")?;
        tracing::info!(
            due = summary.due,
            succeeded = summary.succeeded,
            failed = summary.failed,
            disabled = summary.disabled,
            skipped = summary.skipped,
            "Single poll finished"
        );
        return Ok(());
    }

    let mut loop_config = ScheduleLoopConfig::from_config(&config.schedules);
    if let Some(seconds) = args.interval_seconds {
        loop_config.interval = Duration::from_secs(seconds);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    run_schedule_loop(runner, loop_config, shutdown_rx).await?;

    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
    let sigint = tokio::signal::ctrl_c();

    tokio::select! {
        _ = sigint => {
            tracing::info!("SIGINT received, finishing current poll...");
        }
        _ = sigterm.recv() => {
            tracing::info!("SIGTERM received, finishing current poll...");
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, finishing current poll...");
}
