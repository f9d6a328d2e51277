use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingStatus, IntervalError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid interval: {0}")]
    InvalidInterval(#[from] IntervalError),
    #[error("outside operating hours")]
    OutsideOperatingHours,
    #[error("field closed by closure {closure_id}")]
    FieldClosed { closure_id: Ulid },
    #[error("slot taken by booking {booking_id}")]
    SlotTaken { booking_id: Ulid },
    #[error("booking {booking_id} cannot move from {from} to {to}")]
    InvalidTransition {
        booking_id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    /// Guard acquisition timed out. The only retryable kind.
    #[error("busy: {0} is locked by another request, retry later")]
    Busy(Ulid),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("field {0} still has pending or confirmed bookings")]
    HasActiveBookings(Ulid),
    #[error("actor may not cancel booking {0}")]
    NotPermitted(Ulid),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
    /// The store refused a write the guard had admitted.
    #[error("integrity violation: {0}")]
    Integrity(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Busy(_))
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval(_) => "invalid_interval",
            EngineError::OutsideOperatingHours => "outside_operating_hours",
            EngineError::FieldClosed { .. } => "field_closed",
            EngineError::SlotTaken { .. } => "slot_taken",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Busy(_) => "busy",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::HasActiveBookings(_) => "has_active_bookings",
            EngineError::NotPermitted(_) => "not_permitted",
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
            EngineError::Integrity(_) => "integrity",
        }
    }
}
