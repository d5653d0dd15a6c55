//! Fieldsearch - Web Server Entry Point
//!
//! Serves the search definition API and sweeps idle result-cache entries in the
//! background. Scheduled reports normally run in the `fieldsearch-worker`
//! binary; set `schedules.run_in_server` to poll them from here instead.

use anyhow::Context;
use tokio::sync::watch;

use fieldsearch::{
    api::create_router,
    cache::run_idle_sweep,
    config::Config,
    logging,
    state::{build_schedule_runner, connect_pool, AppState, Backends},
    workers::{run_schedule_loop, ScheduleLoopConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first to get logging settings
    let config = Config::load().context("Failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let _logging_guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = config.logging.deployment_environment,
        "Starting fieldsearch server"
    );

    let addr = config
        .socket_addr()
        .context("Failed to determine socket address")?;

    tracing::info!(
        listen_addr = %addr,
        modules = config.modules.len(),
        cache_capacity = config.search.cache_capacity,
        idle_ttl_seconds = config.search.idle_ttl_seconds,
        run_schedules = config.schedules.run_in_server,
        "Configuration loaded"
    );

    let pool = connect_pool(&config).await?;
    let backends = Backends::postgres(pool.clone(), &config);
    let state = AppState::from_backends(config.clone(), backends)
        .context("Failed to initialize application state")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    background.push(tokio::spawn(run_idle_sweep(
        state.cache.clone(),
        config.idle_sweep_interval(),
        shutdown_rx.clone(),
    )));

    if config.schedules.run_in_server {
        let runner = build_schedule_runner(pool, &config, state.exporter.clone());
        let loop_config = ScheduleLoopConfig::from_config(&config.schedules);
        let shutdown = shutdown_rx.clone();
        background.push(tokio::spawn(async move {
            if let Err(e) = run_schedule_loop(runner, loop_config, shutdown).await {
                tracing::error!(error = %e, "Schedule runner stopped");
            }
        }));
    }

    let app = create_router(state);

    tracing::info!("Fieldsearch listening on http://{}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind TCP listener on {addr}"))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await;

    // Let the sweeper and an in-flight schedule poll finish.
    for task in background {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    if let Err(e) = served {
        tracing::error!(error = %e, "Server terminated unexpectedly");
        return Err(e.into());
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
/// Docker sends SIGTERM, while Ctrl+C sends SIGINT
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
    let sigint = tokio::signal::ctrl_c();

    tokio::select! {
        _ = sigint => {
            tracing::info!("SIGINT received, starting graceful shutdown...");
        }
        _ = sigterm.recv() => {
            tracing::info!("SIGTERM received, starting graceful shutdown...");
        }
    }
}

/// Wait for shutdown signal (SIGINT only on non-Unix platforms)
#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
