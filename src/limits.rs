use crate::model::{DAY_MS, Ms};

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_PARTICIPANTS: usize = 64;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Closures may be long (renovations), but not unbounded.
pub const MAX_CLOSURE_DURATION_MS: Ms = 3 * 366 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

pub const MAX_BOOKINGS_PER_FIELD: usize = 200_000;
pub const MAX_CLOSURES_PER_SCOPE: usize = 10_000;
