use anyhow::Context;
use clap::Parser;
use laser_server::config::Config;
use laser_server::context::ContextHandle;
use laser_server::frame::{Mode, ModeTable, SourceEnv};
use laser_server::metrics::ServerMetrics;
use laser_server::scheduler::{PacketScheduler, SchedulerHandle};
use laser_server::wand::WandListener;
use pyramid::CoordinateTransformer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Initialization ---
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();
    let config = Config::parse();
    config.validate()?;
    tracing::info!(config = ?config, "Laser server starting with configuration");

    let transformer = Arc::new(
        CoordinateTransformer::from_config(config.geometry())
            .context("failed to calibrate laser transforms")?,
    );
    let metrics = Arc::new(ServerMetrics::new().context("failed to register metrics")?);

    // --- 2. Start Metrics Server ---
    let metrics_router = metrics.router();
    let listener = tokio::net::TcpListener::bind(config.metrics_listen_addr)
        .await
        .with_context(|| format!("failed to bind metrics on {}", config.metrics_listen_addr))?;
    tracing::info!(addr = %config.metrics_listen_addr, "Metrics server started");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, metrics_router.into_make_service()).await {
            tracing::error!(error = %e, "Metrics server exited with an error");
        }
    });

    // --- 3. Frame sources, transmit loop and wand listener ---
    let context = ContextHandle::new();
    let (mode_tx, mode_rx) = watch::channel(config.initial_mode);

    let table = ModeTable::new(
        SourceEnv::new(&transformer, config.seed),
        config.initial_mode,
    );
    let scheduler = PacketScheduler::new(config.resolved_targets(), config.packet_interval());
    let transmit = SchedulerHandle::spawn(
        scheduler,
        table,
        context.subscribe(),
        mode_rx,
        metrics.clone(),
    )
    .context("failed to start transmit loop")?;

    let wands = WandListener::spawn(
        config.wand_listen_addr,
        transformer.clone(),
        context.clone(),
        metrics.clone(),
    )
    .with_context(|| format!("failed to bind wand socket on {}", config.wand_listen_addr))?;

    tracing::info!(mode = config.initial_mode.name(), "Streaming started");

    // --- 4. Mode cycling and shutdown ---
    let cycle = config.mode_cycle_secs.map(Duration::from_secs);
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received.");
        }
        _ = cycle_modes(cycle, mode_tx) => {}
    }

    transmit.stop();
    wands.stop();
    tracing::info!("Laser server stopped");
    Ok(())
}

/// Steps through the modes forever, or parks when no period is set.
async fn cycle_modes(period: Option<Duration>, mode_tx: watch::Sender<Mode>) {
    let Some(period) = period else {
        std::future::pending::<()>().await;
        return;
    };

    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let next = mode_tx.borrow().cycle_next();
        tracing::info!(mode = next.name(), "Switching mode");
        if mode_tx.send(next).is_err() {
            return;
        }
    }
}
