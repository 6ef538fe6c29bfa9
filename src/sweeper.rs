use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::{Engine, now_ms};
use crate::observability;

/// One sweep at the current instant. Failures are logged and counted, never
/// returned: the next run simply tries again.
pub async fn sweep_once(engine: &Engine, stop: &CancellationToken) -> usize {
    let started = Instant::now();
    let expired = match engine.sweep_expired(now_ms(), stop).await {
        Ok(n) => n,
        Err(e) => {
            error!("expiration sweep failed: {e}");
            metrics::counter!(observability::SWEEP_FAILURES_TOTAL).increment(1);
            0
        }
    };
    metrics::histogram!(observability::SWEEP_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if expired > 0 {
        info!("expired {expired} appointments");
    }
    expired
}

/// Expire elapsed appointments until `stop` fires.
///
/// Fixed delay: the next run starts `period` after the previous one finished,
/// so a slow run pushes the schedule out and runs never overlap.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration, stop: CancellationToken) {
    loop {
        if stop.is_cancelled() {
            break;
        }
        sweep_once(&engine, &stop).await;
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
    }
    debug!("sweeper stopped");
}

/// Compact the WAL whenever more than `threshold` events were appended since
/// the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, stop: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {}
        }
        let appends = engine.wal_appends_since_compact().await;
        if appends <= threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => debug!("compaction after {appends} appends"),
            Err(e) => error!("WAL compaction failed: {e}"),
        }
    }
    debug!("compactor stopped");
}
