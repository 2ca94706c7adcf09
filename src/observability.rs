use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests handled. Labels: route, status.
pub const REQUESTS_TOTAL: &str = "roomledger_requests_total";

/// Histogram: request latency in seconds. Labels: route.
pub const REQUEST_DURATION_SECONDS: &str = "roomledger_request_duration_seconds";

/// Counter: reservation transactions committed.
pub const RESERVATIONS_TOTAL: &str = "roomledger_reservations_total";

/// Counter: individual slots committed (a weekly series counts each slot).
pub const SLOTS_RESERVED_TOTAL: &str = "roomledger_slots_reserved_total";

/// Counter: reservation attempts rejected by the overlap check.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "roomledger_reservation_conflicts_total";

/// Counter: requests rejected by identity verification.
pub const AUTH_FAILURES_TOTAL: &str = "roomledger_auth_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomledger_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomledger_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
