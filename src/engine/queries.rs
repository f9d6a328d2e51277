use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::{self, Decision, resolve};
use super::closures::{Blocked, blocked_intervals};
use super::{Engine, EngineError};

fn check_window(window: &Span) -> Result<(), EngineError> {
    if window.start >= window.end {
        return Err(IntervalError::Empty.into());
    }
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

impl Engine {
    /// Read-only admission check. Nothing is reserved; a later
    /// `create_booking` re-runs the same checks under the field's guard.
    pub async fn check_availability(
        &self,
        field_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Decision, EngineError> {
        let fs = self.read_field(field_id).await?;
        if fs.retired {
            return Err(EngineError::NotFound(field_id));
        }
        let location = self.read_location(fs.location_id).await?;
        let decision = Decision::from(resolve(&fs, &location, &span, exclude, self.settings.zone));

        let label = match &decision {
            Decision::Admit => "admit",
            Decision::Reject(r) => r.label(),
        };
        metrics::counter!(observability::AVAILABILITY_CHECKS_TOTAL, "decision" => label).increment(1);
        Ok(decision)
    }

    /// Bookings of every status overlapping `window`, sorted by start.
    pub async fn list_bookings_for_field(&self, field_id: Ulid, window: Span) -> Result<Vec<Booking>, EngineError> {
        check_window(&window)?;
        let fs = self.read_field(field_id).await?;
        Ok(overlapping(&fs.bookings, &window).cloned().collect())
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let field_id = self.store.field_for_booking(&booking_id)?;
        let fs = self.read_field(field_id).await?;
        fs.booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Every booking `user_id` takes part in, across all fields.
    pub async fn bookings_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let mut found = Vec::new();
        for field_id in self.store.field_ids() {
            let fs = self.read_field(field_id).await?;
            found.extend(fs.bookings.iter().filter(|b| b.has_participant(user_id)).cloned());
        }
        found.sort_by_key(|b| (b.span.start, b.id));
        Ok(found)
    }

    /// Bookable gaps on the local day containing `t`.
    pub async fn free_spans(&self, field_id: Ulid, t: Ms) -> Result<Vec<Span>, EngineError> {
        let fs = self.read_field(field_id).await?;
        if fs.retired {
            return Err(EngineError::NotFound(field_id));
        }
        let location = self.read_location(fs.location_id).await?;
        Ok(availability::free_spans(&fs, &location, t, self.settings.zone)?)
    }

    /// Field and location closures in effect within `window`, clipped to it.
    pub async fn closures_for(&self, field_id: Ulid, window: Span) -> Result<Vec<Blocked>, EngineError> {
        check_window(&window)?;
        let fs = self.read_field(field_id).await?;
        let location = self.read_location(fs.location_id).await?;
        Ok(blocked_intervals(&fs, &location, &window))
    }

    pub async fn get_field(&self, field_id: Ulid) -> Result<FieldInfo, EngineError> {
        let fs = self.read_field(field_id).await?;
        Ok(FieldInfo::from(&*fs))
    }

    /// Fields of a location that still take bookings.
    pub async fn list_fields(&self, location_id: Ulid) -> Result<Vec<FieldInfo>, EngineError> {
        if !self.store.contains_location(&location_id) {
            return Err(EngineError::NotFound(location_id));
        }
        let mut fields = Vec::new();
        for field_id in self.store.fields_of_location(&location_id) {
            let fs = self.read_field(field_id).await?;
            if !fs.retired {
                fields.push(FieldInfo::from(&*fs));
            }
        }
        Ok(fields)
    }

    /// Pending bookings whose payment deadline is at or before `now`.
    /// A field that stays busy past the guard timeout is left for the next sweep.
    pub async fn collect_expired_bookings(&self, now: Ms) -> Vec<Ulid> {
        let mut expired = Vec::new();
        for field_id in self.store.field_ids() {
            let fs = match self.read_field(field_id).await {
                Ok(fs) => fs,
                Err(e) => {
                    debug!("expiry scan skipped field {field_id}: {e}");
                    continue;
                }
            };
            expired.extend(
                fs.bookings
                    .iter()
                    .filter(|b| b.status == BookingStatus::Pending && b.hold_expires_at <= now)
                    .map(|b| b.id),
            );
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_window_bounds() {
        assert!(check_window(&Span::new(0, DAY_MS)).is_ok());
        assert!(matches!(
            check_window(&Span { start: 10, end: 10 }),
            Err(EngineError::InvalidInterval(IntervalError::Empty))
        ));
        assert!(matches!(
            check_window(&Span::new(0, MAX_QUERY_WINDOW_MS + 1)),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}
