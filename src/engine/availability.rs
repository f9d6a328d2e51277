use chrono::FixedOffset;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::closures::blocked_intervals;
use super::hours::{check_hours, open_window};
use super::EngineError;

/// Why the resolver refused a candidate interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidInterval(IntervalError),
    OutsideOperatingHours,
    FieldClosed { closure_id: Ulid },
    SlotTaken { booking_id: Ulid },
}

impl Rejection {
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::InvalidInterval(_) => "invalid_interval",
            Rejection::OutsideOperatingHours => "outside_operating_hours",
            Rejection::FieldClosed { .. } => "field_closed",
            Rejection::SlotTaken { .. } => "slot_taken",
        }
    }
}

impl From<Rejection> for EngineError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::InvalidInterval(e) => EngineError::InvalidInterval(e),
            Rejection::OutsideOperatingHours => EngineError::OutsideOperatingHours,
            Rejection::FieldClosed { closure_id } => EngineError::FieldClosed { closure_id },
            Rejection::SlotTaken { booking_id } => EngineError::SlotTaken { booking_id },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Reject(Rejection),
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit)
    }
}

impl From<Result<(), Rejection>> for Decision {
    fn from(r: Result<(), Rejection>) -> Self {
        match r {
            Ok(()) => Decision::Admit,
            Err(rejection) => Decision::Reject(rejection),
        }
    }
}

// ── Resolver ──────────────────────────────────────────────────────

/// Decide whether `candidate` may be booked on `field`.
///
/// Checks run in a fixed order and the first failure wins:
/// well-formed interval, operating hours, closures, held bookings
/// (other than `exclude`, the booking being moved).
pub fn resolve(
    field: &FieldState,
    location: &LocationState,
    candidate: &Span,
    exclude: Option<Ulid>,
    zone: FixedOffset,
) -> Result<(), Rejection> {
    if candidate.start >= candidate.end {
        return Err(Rejection::InvalidInterval(IntervalError::Empty));
    }
    if candidate.start < MIN_VALID_TIMESTAMP_MS || candidate.end > MAX_VALID_TIMESTAMP_MS {
        return Err(Rejection::InvalidInterval(IntervalError::OutOfRange));
    }

    check_hours(field, candidate, zone)?;

    // The hours gate guarantees the candidate sits inside one local day.
    let day = day_window(candidate.start, zone).map_err(Rejection::InvalidInterval)?;
    if let Some(b) = blocked_intervals(field, location, &day)
        .into_iter()
        .find(|b| b.span.overlaps(candidate))
    {
        return Err(Rejection::FieldClosed { closure_id: b.closure_id });
    }

    if let Some(existing) = field.held_overlapping(candidate, exclude).next() {
        return Err(Rejection::SlotTaken { booking_id: existing.id });
    }

    Ok(())
}

/// Bookable gaps on the local day containing `t`: the open window minus
/// closures minus held bookings.
pub fn free_spans(
    field: &FieldState,
    location: &LocationState,
    t: Ms,
    zone: FixedOffset,
) -> Result<Vec<Span>, IntervalError> {
    let Some(open) = open_window(field, t, zone)? else {
        return Ok(Vec::new());
    };
    let day = day_window(t, zone)?;

    let mut blocked: Vec<Span> = blocked_intervals(field, location, &day)
        .into_iter()
        .map(|b| b.span)
        .collect();
    blocked.extend(field.held_overlapping(&day, None).filter_map(|b| b.span.clip(&day)));
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&blocked);

    Ok(subtract_intervals(&[open], &blocked))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` spans from sorted `base` spans.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        for r in to_remove[ri..].iter().take_while(|r| r.start < b.end) {
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
        }

        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}
