use std::net::SocketAddr;

use crate::protocol::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "rentlog_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "rentlog_request_duration_seconds";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: rentals committed. Labels: action (created, updated, deleted).
pub const RENTALS_COMMITTED_TOTAL: &str = "rentlog_rentals_committed_total";

/// Counter: rental mutations rejected. Labels: reason (error kind).
pub const RENTALS_REJECTED_TOTAL: &str = "rentlog_rentals_rejected_total";

/// Gauge: rentals currently on the books.
pub const RENTALS_ACTIVE: &str = "rentlog_rentals_active";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rentlog_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rentlog_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rentlog_connections_rejected_total";

/// Histogram: journal group-commit flush duration in seconds. Labels: journal.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "rentlog_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (records per flush). Labels: journal.
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "rentlog_journal_flush_batch_size";

/// Counter: compactions run. Labels: journal, status.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "rentlog_journal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a request, used on every per-op metric.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::Ping => "ping",
        Request::CreateReservation(_) => "create_reservation",
        Request::GetReservation { .. } => "get_reservation",
        Request::ListReservations(_) => "list_reservations",
        Request::UpdateReservation { .. } => "update_reservation",
        Request::DeleteReservation { .. } => "delete_reservation",
        Request::RegisterCar(_) => "register_car",
        Request::UpdateCar { .. } => "update_car",
        Request::GetCar { .. } => "get_car",
        Request::ListCars(_) => "list_cars",
        Request::UpdateAccessory { .. } => "update_accessory",
        Request::RemoveCar { .. } => "remove_car",
        Request::RegisterUser(_) => "register_user",
        Request::UpdateUser { .. } => "update_user",
        Request::GetUser { .. } => "get_user",
        Request::ListUsers(_) => "list_users",
        Request::RemoveUser { .. } => "remove_user",
    }
}
