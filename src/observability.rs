use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking operations. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "spotbook_operations_total";

/// Histogram: booking operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "spotbook_operation_duration_seconds";

/// Counter: allocations that found no free spot. Labels: category.
pub const ALLOCATION_MISSES_TOTAL: &str = "spotbook_allocation_misses_total";

// ── Sweeper ─────────────────────────────────────────────────────

/// Counter: appointments moved to EXPIRED by the sweeper.
pub const APPOINTMENTS_EXPIRED_TOTAL: &str = "spotbook_appointments_expired_total";

/// Counter: sweep runs that failed.
pub const SWEEP_FAILURES_TOTAL: &str = "spotbook_sweep_failures_total";

/// Histogram: duration of one sweep in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "spotbook_sweep_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "spotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "spotbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for the `status` dimension of `OPERATIONS_TOTAL`.
pub fn status_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(EngineError::InvalidDateRange)
        | Err(EngineError::InvalidDateFormat(_))
        | Err(EngineError::InvalidTimeZone(_))
        | Err(EngineError::UnknownCategory(_))
        | Err(EngineError::TimestampOutOfRange(_))
        | Err(EngineError::LimitExceeded(_)) => "invalid",
        Err(EngineError::NoAvailableSpot { .. }) => "no_spot",
        Err(EngineError::RecordNotFound(_)) => "not_found",
        Err(EngineError::NoOpUpdate) => "noop",
        Err(EngineError::Conflict(_))
        | Err(EngineError::AlreadyExists(_))
        | Err(EngineError::CapacityExceeded { .. })
        | Err(EngineError::AlreadyInLot { .. })
        | Err(EngineError::SpotInUse(_)) => "conflict",
        Err(EngineError::PersistenceFailure(_)) => "error",
    }
}

/// Record one finished operation.
pub fn record<T>(operation: &'static str, started: std::time::Instant, result: &Result<T, EngineError>) {
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status_label(result))
        .increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}
