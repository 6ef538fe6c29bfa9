use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use spotbook::config::Config;
use spotbook::engine::Engine;
use spotbook::{observability, report, sweeper};

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path())?);

    info!("spotbook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  default zone: {}", config.default_zone);
    info!("  sweep interval: {}s", config.sweep_interval.as_secs());
    info!("  compact threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );
    for lot in report::occupancy(&engine).await {
        info!(
            "  lot '{}': {}/{} occupied",
            lot.lot_name, lot.overall.occupied, lot.overall.total
        );
    }

    let stop = CancellationToken::new();
    let sweeper = tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        config.sweep_interval,
        stop.clone(),
    ));
    let compactor = tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        stop.clone(),
    ));

    shutdown_signal().await;
    info!("shutdown signal received, stopping background tasks");
    stop.cancel();
    if let Err(e) = sweeper.await {
        warn!("sweeper task ended abnormally: {e}");
    }
    if let Err(e) = compactor.await {
        warn!("compactor task ended abnormally: {e}");
    }

    if let Err(e) = engine.compact_wal().await {
        warn!("final compaction failed: {e}");
    }
    info!("spotbook stopped");
    Ok(())
}
