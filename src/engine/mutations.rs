use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{validate_span, validate_text};
use super::guard::FieldGuard;
use super::store::apply_to_location;
use super::{Engine, EngineError, wal_append};

fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidRequest("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_spec(spec: &FieldSpec) -> Result<(), EngineError> {
    validate_name(&spec.name, "field name too long")?;
    validate_text(&spec.category, MAX_NAME_LEN, "category too long")?;
    validate_name(&spec.field_type.name, "field type name too long")?;
    if spec.hourly_rate_cents < 0 {
        return Err(EngineError::InvalidRequest("hourly rate must not be negative"));
    }
    if spec.field_type.max_players == 0 {
        return Err(EngineError::InvalidRequest("field type must admit at least one player"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_location(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        validate_name(&name, "location name too long")?;
        let _catalog = self.lock_catalog(id).await?;
        if self.store.contains_location(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::LocationCreated { id, name: name.clone() };
        wal_append(&self.wal_tx, &event).await?;
        self.store.insert_location(LocationState::new(id, name));
        info!("location {id} created");
        Ok(())
    }

    pub async fn create_field(
        &self,
        id: Ulid,
        location_id: Ulid,
        owner_id: Ulid,
        spec: FieldSpec,
    ) -> Result<(), EngineError> {
        validate_spec(&spec)?;
        let _catalog = self.lock_catalog(id).await?;
        if self.store.contains_field(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.store.contains_location(&location_id) {
            return Err(EngineError::NotFound(location_id));
        }

        let event = Event::FieldCreated {
            id,
            location_id,
            owner_id,
            spec: spec.clone(),
        };
        wal_append(&self.wal_tx, &event).await?;
        self.store
            .insert_field(FieldState::new(id, location_id, owner_id, spec));
        self.notify.send(id, &event);
        info!("field {id} created at location {location_id}");
        Ok(())
    }

    /// Lock a field for a catalog edit. Retired fields are gone for editing.
    async fn lock_live_field(&self, id: Ulid) -> Result<FieldGuard, EngineError> {
        let guard = self.lock_field(id).await?;
        if guard.retired {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    pub async fn update_field(&self, id: Ulid, spec: FieldSpec) -> Result<(), EngineError> {
        validate_spec(&spec)?;
        let mut guard = self.lock_live_field(id).await?;
        let event = Event::FieldUpdated { id, spec };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Retire a field. Its bookings stay readable; nothing new can be booked.
    pub async fn retire_field(&self, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.lock_live_field(id).await?;
        if guard.has_held_bookings() {
            return Err(EngineError::HasActiveBookings(id));
        }
        let event = Event::FieldRetired { id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("field {id} retired");
        Ok(())
    }

    /// Set (or replace) the opening hours for one day of week.
    pub async fn set_operating_hours(&self, field_id: Ulid, hours: OperatingHour) -> Result<(), EngineError> {
        if !hours.is_valid() {
            return Err(EngineError::InvalidRequest("operating hours need day < 7 and opens < closes <= 1440"));
        }
        let mut guard = self.lock_live_field(field_id).await?;
        let event = Event::OperatingHoursSet { field_id, hours };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Close a field for a whole day of week.
    pub async fn clear_operating_hours(&self, field_id: Ulid, day: u8) -> Result<(), EngineError> {
        if day >= 7 {
            return Err(EngineError::InvalidRequest("day of week must be 0..=6"));
        }
        let mut guard = self.lock_live_field(field_id).await?;
        let event = Event::OperatingHoursCleared { field_id, day };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_field_closure(
        &self,
        id: Ulid,
        field_id: Ulid,
        span: Span,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        validate_text(&reason, MAX_REASON_LEN, "reason too long")?;
        let mut guard = self.lock_live_field(field_id).await?;
        if guard.closures.len() >= MAX_CLOSURES_PER_SCOPE {
            return Err(EngineError::LimitExceeded("too many closures on field"));
        }
        if guard.closures.iter().any(|c| c.id == id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::FieldClosureAdded { id, field_id, span, reason };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("field {field_id} closed [{}, {}) by closure {id}", span.start, span.end);
        Ok(())
    }

    pub async fn remove_field_closure(&self, field_id: Ulid, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.lock_live_field(field_id).await?;
        if !guard.closures.iter().any(|c| c.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::FieldClosureRemoved { id, field_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Close every field of a location. A second closure with the same
    /// `(start, end)` is rejected with the id of the first.
    pub async fn add_global_closure(
        &self,
        id: Ulid,
        location_id: Ulid,
        span: Span,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        validate_text(&reason, MAX_REASON_LEN, "reason too long")?;
        let mut guard = self.lock_location(location_id).await?;
        if let Some(existing) = guard.closures.iter().find(|c| c.span == span || c.id == id) {
            return Err(EngineError::AlreadyExists(existing.id));
        }
        if guard.closures.len() >= MAX_CLOSURES_PER_SCOPE {
            return Err(EngineError::LimitExceeded("too many closures on location"));
        }

        let event = Event::GlobalClosureAdded {
            id,
            location_id,
            span,
            reason,
        };
        wal_append(&self.wal_tx, &event).await?;
        apply_to_location(&mut guard, &event);
        self.notify_location(location_id, &event);
        info!("location {location_id} closed [{}, {}) by closure {id}", span.start, span.end);
        Ok(())
    }

    pub async fn remove_global_closure(&self, location_id: Ulid, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.lock_location(location_id).await?;
        if !guard.closures.iter().any(|c| c.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::GlobalClosureRemoved { id, location_id };
        wal_append(&self.wal_tx, &event).await?;
        apply_to_location(&mut guard, &event);
        self.notify_location(location_id, &event);
        Ok(())
    }

    /// Location events change every calendar at the location.
    fn notify_location(&self, location_id: Ulid, event: &Event) {
        for field_id in self.store.fields_of_location(&location_id) {
            self.notify.send(field_id, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> FieldSpec {
        FieldSpec {
            name: "Court 1".into(),
            category: Some("tennis".into()),
            hourly_rate_cents: 2500,
            field_type: FieldType { name: "doubles".into(), max_players: 4 },
        }
    }

    #[test]
    fn spec_validation() {
        assert!(validate_spec(&spec()).is_ok());

        let mut blank = spec();
        blank.name = "  ".into();
        assert!(matches!(validate_spec(&blank), Err(EngineError::InvalidRequest(_))));

        let mut negative = spec();
        negative.hourly_rate_cents = -1;
        assert!(matches!(validate_spec(&negative), Err(EngineError::InvalidRequest(_))));

        let mut empty_type = spec();
        empty_type.field_type.max_players = 0;
        assert!(matches!(validate_spec(&empty_type), Err(EngineError::InvalidRequest(_))));

        let mut long = spec();
        long.name = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            validate_spec(&long),
            Err(EngineError::LimitExceeded("field name too long"))
        ));
    }
}
