use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotbook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "slotbook_auth_failures_total";

/// Histogram: WAL append plus fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Gauge: reservations currently held in memory.
pub const RESERVATIONS_ACTIVE: &str = "slotbook_reservations_active";

pub const RESERVATIONS_CREATED_TOTAL: &str = "slotbook_reservations_created_total";

pub const RESERVATIONS_CANCELLED_TOTAL: &str = "slotbook_reservations_cancelled_total";

/// Counter: creations refused because the slot was taken.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "slotbook_reservation_conflicts_total";

/// Counter: reservations purged by the retention sweep.
pub const RESERVATIONS_SWEPT_TOTAL: &str = "slotbook_reservations_swept_total";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateReservation { .. } => "create_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::ListReservations => "list_reservations",
        Command::ListOwnReservations => "list_own_reservations",
        Command::ListOwnerReservations { .. } => "list_owner_reservations",
    }
}
