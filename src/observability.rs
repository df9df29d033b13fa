use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "proctord_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "proctord_query_duration_seconds";

// ── Attendance ──────────────────────────────────────────────────

/// Counter: successful check-ins. Labels: status.
pub const CHECK_INS_TOTAL: &str = "proctord_check_ins_total";

/// Counter: one-time codes issued.
pub const CODES_ISSUED_TOTAL: &str = "proctord_codes_issued_total";

/// Counter: assignments marked absent by the sweep.
pub const ABSENCES_MARKED_TOTAL: &str = "proctord_absences_marked_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "proctord_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "proctord_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "proctord_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "proctord_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "proctord_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "proctord_wal_flush_batch_size";

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
        Command::InsertBooking { .. } => "insert_booking",
        Command::BatchInsertBookings { .. } => "batch_insert_bookings",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectOccupancy { .. } => "select_occupancy",
        Command::InsertAssignment { .. } => "insert_assignment",
        Command::SelectAssignments { .. } => "select_assignments",
        Command::GenerateCodes { .. } => "generate_codes",
        Command::ResetCode { .. } => "reset_code",
        Command::SelectVerify { .. } => "verify",
        Command::InsertCheckIn { .. } => "check_in",
        Command::CheckInByCode { .. } => "check_in_by_code",
        Command::SelectSubstitutionCandidates { .. } => "substitution_candidates",
        Command::SelectAbsenceSweep { .. } => "absence_sweep",
        Command::InsertOverride { .. } => "override",
        Command::SelectAttendanceSummary => "attendance_summary",
    }
}
