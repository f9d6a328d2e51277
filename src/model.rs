use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// Minutes in a day; the latest representable closing time.
pub const MINUTES_PER_DAY: u16 = 1440;

/// Why an interval could not be built or accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum IntervalError {
    #[error("interval start must be before its end")]
    Empty,
    #[error("interval crosses local midnight")]
    CrossesMidnight,
    #[error("interval endpoints carry different UTC offsets")]
    MixedZones,
    #[error("timestamp out of range")]
    OutOfRange,
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn try_new(start: Ms, end: Ms) -> Result<Self, IntervalError> {
        if start >= end {
            return Err(IntervalError::Empty);
        }
        Ok(Self { start, end })
    }

    /// Build a span from two zoned instants. Both ends must be expressed in
    /// the same offset; the result is normalized to UTC milliseconds.
    pub fn from_zoned(
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Self, IntervalError> {
        if start.offset() != end.offset() {
            return Err(IntervalError::MixedZones);
        }
        Self::try_new(start.timestamp_millis(), end.timestamp_millis())
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Intersection with `window`, or `None` when they do not overlap.
    pub fn clip(&self, window: &Span) -> Option<Span> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (start < end).then_some(Span { start, end })
    }
}

fn to_local(t: Ms, zone: FixedOffset) -> Result<DateTime<FixedOffset>, IntervalError> {
    DateTime::from_timestamp_millis(t)
        .map(|utc| utc.with_timezone(&zone))
        .ok_or(IntervalError::OutOfRange)
}

/// The local calendar day containing `t`: `[midnight, next midnight)` in `zone`.
pub fn day_window(t: Ms, zone: FixedOffset) -> Result<Span, IntervalError> {
    let local = to_local(t, zone)?;
    let since_midnight = Ms::from(local.num_seconds_from_midnight()) * 1000
        + Ms::from(local.timestamp_subsec_millis());
    let midnight = t - since_midnight;
    Ok(Span::new(midnight, midnight + DAY_MS))
}

/// Local day of week of `t`, Monday = 0 .. Sunday = 6.
pub fn weekday(t: Ms, zone: FixedOffset) -> Result<u8, IntervalError> {
    let local = to_local(t, zone)?;
    Ok(local.weekday().num_days_from_monday() as u8)
}

// ── Sorted span collections ──────────────────────────────────────

/// Anything that occupies a span. Collections of these are kept sorted by
/// `span().start` so overlap scans can binary-search their right edge.
pub trait Spanned {
    fn span(&self) -> Span;
}

/// Items of a start-sorted slice whose span overlaps `query`.
/// Everything at index >= the partition point starts at or after `query.end`.
pub fn overlapping<'a, T: Spanned>(
    sorted: &'a [T],
    query: &Span,
) -> impl Iterator<Item = &'a T> + use<'a, T> {
    let query = *query;
    let right_bound = sorted.partition_point(|i| i.span().start < query.end);
    sorted[..right_bound]
        .iter()
        .filter(move |i| i.span().end > query.start)
}

/// Insert keeping start order; equal starts keep insertion order.
pub fn insert_sorted<T: Spanned>(items: &mut Vec<T>, item: T) {
    let start = item.span().start;
    let pos = items.partition_point(|i| i.span().start <= start);
    items.insert(pos, item);
}

// ── Catalog ──────────────────────────────────────────────────────

/// Capacity class of a field (five-a-side, tennis court, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldType {
    pub name: String,
    pub max_players: u32,
}

/// Owner-editable attributes of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub category: Option<String>,
    pub hourly_rate_cents: i64,
    pub field_type: FieldType,
}

/// Opening hours for one day of week, as minutes after local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHour {
    /// Monday = 0 .. Sunday = 6.
    pub day: u8,
    pub opens: u16,
    pub closes: u16,
}

impl OperatingHour {
    pub fn is_valid(&self) -> bool {
        self.day < 7 && self.opens < self.closes && self.closes <= MINUTES_PER_DAY
    }

    /// The open window on the day starting at `midnight`.
    pub fn window(&self, midnight: Ms) -> Span {
        Span::new(
            midnight + Ms::from(self.opens) * MINUTE_MS,
            midnight + Ms::from(self.closes) * MINUTE_MS,
        )
    }
}

/// An explicit block on a field or on every field of a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    pub id: Ulid,
    pub span: Span,
    pub reason: Option<String>,
}

impl Spanned for Closure {
    fn span(&self) -> Span {
        self.span
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    /// Held bookings block their interval for everyone else.
    pub fn is_held(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Pending, Expired) | (Confirmed, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    User(Ulid),
    /// The payment collaborator reporting a failed payment.
    Payment,
    System,
}

/// A user attached to a booking. Exactly one participant is the booker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingUser {
    pub user_id: Ulid,
    pub is_booker: bool,
}

impl BookingUser {
    pub fn booker(user_id: Ulid) -> Self {
        Self { user_id, is_booker: true }
    }

    pub fn guest(user_id: Ulid) -> Self {
        Self { user_id, is_booker: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub field_id: Ulid,
    pub span: Span,
    pub slots: u32,
    pub status: BookingStatus,
    pub participants: Vec<BookingUser>,
    pub amount_cents: i64,
    pub created_at: Ms,
    /// Deadline for payment while the booking is pending.
    pub hold_expires_at: Ms,
    pub updated_at: Ms,
    pub cancelled_by: Option<Actor>,
}

impl Booking {
    pub fn is_held(&self) -> bool {
        self.status.is_held()
    }

    pub fn booker(&self) -> Option<Ulid> {
        self.participants
            .iter()
            .find(|p| p.is_booker)
            .map(|p| p.user_id)
    }

    pub fn has_participant(&self, user_id: Ulid) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }
}

impl Spanned for Booking {
    fn span(&self) -> Span {
        self.span
    }
}

/// Price of `span` at `hourly_rate_cents`, rounded up to a whole cent.
pub fn prorated_amount(hourly_rate_cents: i64, span: &Span) -> i64 {
    let numerator = i128::from(hourly_rate_cents) * i128::from(span.duration_ms());
    let hour = i128::from(HOUR_MS);
    let amount = (numerator + hour - 1).div_euclid(hour);
    i64::try_from(amount).unwrap_or(i64::MAX)
}

// ── In-memory state ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LocationState {
    pub id: Ulid,
    pub name: String,
    /// Location-wide closures, sorted by `span.start`.
    pub closures: Vec<Closure>,
}

impl LocationState {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            closures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldState {
    pub id: Ulid,
    pub location_id: Ulid,
    pub owner_id: Ulid,
    pub spec: FieldSpec,
    pub retired: bool,
    /// Indexed by day of week, Monday = 0.
    pub hours: [Option<OperatingHour>; 7],
    /// Field closures, sorted by `span.start`.
    pub closures: Vec<Closure>,
    /// Every booking ever made on this field, sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl FieldState {
    pub fn new(id: Ulid, location_id: Ulid, owner_id: Ulid, spec: FieldSpec) -> Self {
        Self {
            id,
            location_id,
            owner_id,
            spec,
            retired: false,
            hours: [None; 7],
            closures: Vec::new(),
            bookings: Vec::new(),
        }
    }

    pub fn hours_for(&self, day: u8) -> Option<&OperatingHour> {
        self.hours.get(usize::from(day)).and_then(Option::as_ref)
    }

    /// Held bookings overlapping `span`, skipping `exclude`.
    pub fn held_overlapping<'a>(
        &'a self,
        span: &Span,
        exclude: Option<Ulid>,
    ) -> impl Iterator<Item = &'a Booking> + use<'a> {
        overlapping(&self.bookings, span)
            .filter(move |b| b.is_held() && Some(b.id) != exclude)
    }

    pub fn has_held_bookings(&self) -> bool {
        self.bookings.iter().any(Booking::is_held)
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }
}

/// Everything that changes state. Flat, no nesting; this is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LocationCreated {
        id: Ulid,
        name: String,
    },
    GlobalClosureAdded {
        id: Ulid,
        location_id: Ulid,
        span: Span,
        reason: Option<String>,
    },
    GlobalClosureRemoved {
        id: Ulid,
        location_id: Ulid,
    },
    FieldCreated {
        id: Ulid,
        location_id: Ulid,
        owner_id: Ulid,
        spec: FieldSpec,
    },
    FieldUpdated {
        id: Ulid,
        spec: FieldSpec,
    },
    FieldRetired {
        id: Ulid,
    },
    OperatingHoursSet {
        field_id: Ulid,
        hours: OperatingHour,
    },
    OperatingHoursCleared {
        field_id: Ulid,
        day: u8,
    },
    FieldClosureAdded {
        id: Ulid,
        field_id: Ulid,
        span: Span,
        reason: Option<String>,
    },
    FieldClosureRemoved {
        id: Ulid,
        field_id: Ulid,
    },
    /// Also written by compaction with the booking's current state.
    BookingCreated {
        booking: Booking,
    },
    BookingConfirmed {
        id: Ulid,
        field_id: Ulid,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        field_id: Ulid,
        by: Actor,
        at: Ms,
    },
    BookingExpired {
        id: Ulid,
        field_id: Ulid,
        at: Ms,
    },
    BookingRescheduled {
        id: Ulid,
        field_id: Ulid,
        span: Span,
        amount_cents: i64,
        at: Ms,
    },
}

impl Event {
    /// The field this event mutates, if it is field-scoped.
    pub fn field_id(&self) -> Option<Ulid> {
        match self {
            Event::FieldUpdated { id, .. } | Event::FieldRetired { id } => Some(*id),
            Event::OperatingHoursSet { field_id, .. }
            | Event::OperatingHoursCleared { field_id, .. }
            | Event::FieldClosureAdded { field_id, .. }
            | Event::FieldClosureRemoved { field_id, .. }
            | Event::BookingConfirmed { field_id, .. }
            | Event::BookingCancelled { field_id, .. }
            | Event::BookingExpired { field_id, .. }
            | Event::BookingRescheduled { field_id, .. } => Some(*field_id),
            Event::BookingCreated { booking } => Some(booking.field_id),
            Event::LocationCreated { .. }
            | Event::GlobalClosureAdded { .. }
            | Event::GlobalClosureRemoved { .. }
            | Event::FieldCreated { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub id: Ulid,
    pub location_id: Ulid,
    pub owner_id: Ulid,
    pub spec: FieldSpec,
    pub retired: bool,
    pub hours: Vec<OperatingHour>,
}

impl From<&FieldState> for FieldInfo {
    fn from(fs: &FieldState) -> Self {
        Self {
            id: fs.id,
            location_id: fs.location_id,
            owner_id: fs.owner_id,
            spec: fs.spec.clone(),
            retired: fs.retired,
            hours: fs.hours.iter().flatten().copied().collect(),
        }
    }
}
