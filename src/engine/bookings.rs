use std::collections::HashSet;

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::{Rejection, resolve};
use super::guard::FieldGuard;
use super::{Engine, EngineError};

fn validate_participants(participants: &[BookingUser]) -> Result<(), EngineError> {
    if participants.is_empty() {
        return Err(EngineError::InvalidRequest("booking needs at least one participant"));
    }
    if participants.len() > MAX_PARTICIPANTS {
        return Err(EngineError::LimitExceeded("too many participants"));
    }
    if participants.iter().filter(|p| p.is_booker).count() != 1 {
        return Err(EngineError::InvalidRequest("booking needs exactly one booker"));
    }
    let mut seen = HashSet::with_capacity(participants.len());
    if !participants.iter().all(|p| seen.insert(p.user_id)) {
        return Err(EngineError::InvalidRequest("participant listed twice"));
    }
    Ok(())
}

fn check_transition(booking: &Booking, to: BookingStatus) -> Result<(), EngineError> {
    if booking.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            booking_id: booking.id,
            from: booking.status,
            to,
        })
    }
}

fn rejected(field_id: Ulid, span: &Span, rejection: Rejection) -> EngineError {
    metrics::counter!(observability::BOOKING_REJECTIONS_TOTAL, "reason" => rejection.label()).increment(1);
    debug!(
        "request for field {field_id} [{}, {}) rejected: {}",
        span.start,
        span.end,
        rejection.label()
    );
    rejection.into()
}

impl Engine {
    /// Reserve `span` on a field. On success the booking is `Pending`, held,
    /// and visible to every check that starts after this returns.
    pub async fn create_booking(
        &self,
        field_id: Ulid,
        span: Span,
        slots: u32,
        participants: Vec<BookingUser>,
    ) -> Result<Booking, EngineError> {
        validate_participants(&participants)?;

        let guard = self.lock_field(field_id).await?;
        if guard.retired {
            return Err(EngineError::NotFound(field_id));
        }
        if slots == 0 || slots > guard.spec.field_type.max_players {
            return Err(EngineError::InvalidRequest("slots outside field capacity"));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_FIELD {
            return Err(EngineError::LimitExceeded("too many bookings on field"));
        }

        let location = self.read_location(guard.location_id).await?;
        if let Err(rejection) = resolve(&guard, &location, &span, None, self.settings.zone) {
            return Err(rejected(field_id, &span, rejection));
        }
        drop(location);

        let now = self.clock.now_ms();
        let booking = Booking {
            id: Ulid::new(),
            field_id,
            span,
            slots,
            status: BookingStatus::Pending,
            participants,
            amount_cents: prorated_amount(guard.spec.hourly_rate_cents, &span),
            created_at: now,
            hold_expires_at: now.saturating_add(self.settings.hold_duration_ms),
            updated_at: now,
            cancelled_by: None,
        };
        let id = booking.id;
        let booking = self
            .commit_booking(guard, Event::BookingCreated { booking }, id)
            .await?;

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!("booking {id} pending on field {field_id} [{}, {})", span.start, span.end);
        Ok(booking)
    }

    /// Lock the field that owns `booking_id` and read the booking under it.
    async fn lock_booking(&self, booking_id: Ulid) -> Result<(FieldGuard, Booking), EngineError> {
        let field_id = self.store.field_for_booking(&booking_id)?;
        let guard = self.lock_field(field_id).await?;
        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        Ok((guard, booking))
    }

    async fn commit_transition(
        &self,
        guard: FieldGuard,
        event: Event,
        booking_id: Ulid,
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let booking = self.commit_booking(guard, event, booking_id).await?;
        metrics::counter!(observability::BOOKING_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        info!("booking {booking_id} {to}");
        Ok(booking)
    }

    /// The payment collaborator reported success.
    pub async fn confirm_payment(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let (guard, booking) = self.lock_booking(booking_id).await?;
        check_transition(&booking, BookingStatus::Confirmed)?;

        let event = Event::BookingConfirmed {
            id: booking_id,
            field_id: booking.field_id,
            at: self.clock.now_ms(),
        };
        self.commit_transition(guard, event, booking_id, BookingStatus::Confirmed)
            .await
    }

    /// Cancel a pending or confirmed booking, releasing its interval.
    /// A user may cancel only as the booker or as the field's owner.
    pub async fn cancel_booking(&self, booking_id: Ulid, actor: Actor) -> Result<Booking, EngineError> {
        let (guard, booking) = self.lock_booking(booking_id).await?;
        if let Actor::User(user_id) = actor
            && booking.booker() != Some(user_id)
            && guard.owner_id != user_id
        {
            return Err(EngineError::NotPermitted(booking_id));
        }
        check_transition(&booking, BookingStatus::Cancelled)?;

        let event = Event::BookingCancelled {
            id: booking_id,
            field_id: booking.field_id,
            by: actor,
            at: self.clock.now_ms(),
        };
        self.commit_transition(guard, event, booking_id, BookingStatus::Cancelled)
            .await
    }

    /// Expire an unpaid hold whose deadline has passed. The status is read
    /// under the guard, so a booking confirmed in the meantime fails with
    /// `InvalidTransition` and stays confirmed.
    pub async fn expire_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let (guard, booking) = self.lock_booking(booking_id).await?;
        check_transition(&booking, BookingStatus::Expired)?;

        let now = self.clock.now_ms();
        if booking.hold_expires_at > now {
            return Err(EngineError::InvalidRequest("hold has not expired yet"));
        }

        let event = Event::BookingExpired {
            id: booking_id,
            field_id: booking.field_id,
            at: now,
        };
        self.commit_transition(guard, event, booking_id, BookingStatus::Expired)
            .await
    }

    /// Move a held booking to `span` on the same field. The booking's own
    /// interval does not block the move.
    pub async fn reschedule_booking(&self, booking_id: Ulid, span: Span) -> Result<Booking, EngineError> {
        let (guard, booking) = self.lock_booking(booking_id).await?;
        if !booking.is_held() {
            return Err(EngineError::InvalidRequest("only pending or confirmed bookings can move"));
        }

        let location = self.read_location(guard.location_id).await?;
        if let Err(rejection) = resolve(&guard, &location, &span, Some(booking_id), self.settings.zone) {
            return Err(rejected(booking.field_id, &span, rejection));
        }
        drop(location);

        let event = Event::BookingRescheduled {
            id: booking_id,
            field_id: booking.field_id,
            span,
            amount_cents: prorated_amount(guard.spec.hourly_rate_cents, &span),
            at: self.clock.now_ms(),
        };
        let moved = self.commit_booking(guard, event, booking_id).await?;

        metrics::counter!(observability::BOOKING_TRANSITIONS_TOTAL, "to" => "rescheduled").increment(1);
        info!(
            "booking {booking_id} moved from [{}, {}) to [{}, {})",
            booking.span.start, booking.span.end, span.start, span.end
        );
        Ok(moved)
    }
}
