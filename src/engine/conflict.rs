use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Range checks for spans written by owners (closures).
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(IntervalError::Empty.into());
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(IntervalError::OutOfRange.into());
    }
    if span.duration_ms() > MAX_CLOSURE_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_text(text: &Option<String>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match text {
        Some(t) if t.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

/// Store-level exclusion constraint: no two held bookings on one field may
/// overlap. Checked on every write that places or moves a held interval.
/// The resolver already ran under the guard, so a hit here is a guard defect.
pub(crate) fn check_exclusion(fs: &FieldState, event: &Event) -> Result<(), EngineError> {
    let (id, span): (Ulid, Span) = match event {
        Event::BookingCreated { booking } if booking.is_held() => (booking.id, booking.span),
        Event::BookingRescheduled { id, span, .. } => (*id, *span),
        _ => return Ok(()),
    };
    match fs.held_overlapping(&span, Some(id)).next() {
        Some(existing) => Err(EngineError::Integrity(format!(
            "booking {id} [{}, {}) overlaps held booking {} on field {}",
            span.start, span.end, existing.id, fs.id
        ))),
        None => Ok(()),
    }
}
