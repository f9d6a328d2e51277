use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Request metrics ─────────────────────────────────────────────

/// Counter: read-only availability checks. Labels: decision.
pub const AVAILABILITY_CHECKS_TOTAL: &str = "fieldbook_availability_checks_total";

/// Counter: bookings created (entered `pending`).
pub const BOOKINGS_CREATED_TOTAL: &str = "fieldbook_bookings_created_total";

/// Counter: creations and reschedules refused by the resolver. Labels: reason.
pub const BOOKING_REJECTIONS_TOTAL: &str = "fieldbook_booking_rejections_total";

/// Counter: committed state changes of existing bookings. Labels: to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "fieldbook_booking_transitions_total";

/// Counter: payment outcomes consumed. Labels: outcome, status.
pub const PAYMENT_EVENTS_TOTAL: &str = "fieldbook_payment_events_total";

// ── Guard and store ─────────────────────────────────────────────

/// Histogram: time spent waiting for a field or location guard, in seconds.
pub const GUARD_WAIT_SECONDS: &str = "fieldbook_guard_wait_seconds";

/// Counter: guard waits that hit the timeout and returned `Busy`.
pub const GUARD_TIMEOUTS_TOTAL: &str = "fieldbook_guard_timeouts_total";

/// Counter: writes refused by the exclusion constraint after the guard admitted them.
pub const INTEGRITY_VIOLATIONS_TOTAL: &str = "fieldbook_integrity_violations_total";

/// Counter: pending bookings expired by the sweeper.
pub const HOLDS_EXPIRED_TOTAL: &str = "fieldbook_holds_expired_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fieldbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fieldbook_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "fieldbook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
