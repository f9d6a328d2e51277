use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub type SharedField = Arc<RwLock<FieldState>>;
pub type SharedLocation = Arc<RwLock<LocationState>>;

/// Id-keyed repository over the in-memory state. Fields and locations are
/// looked up by id on every access; nothing holds references across them.
pub struct Store {
    locations: DashMap<Ulid, SharedLocation>,
    fields: DashMap<Ulid, SharedField>,
    /// Reverse lookup: booking id → field id
    booking_to_field: DashMap<Ulid, Ulid>,
    /// Location → fields index.
    location_fields: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            locations: DashMap::new(),
            fields: DashMap::new(),
            booking_to_field: DashMap::new(),
            location_fields: DashMap::new(),
        }
    }

    /// Rebuild state from replayed WAL events. State is built unshared and
    /// only wrapped in locks once every event has been applied.
    pub fn from_events(events: &[Event]) -> Self {
        let store = Self::new();
        let mut locations: HashMap<Ulid, LocationState> = HashMap::new();
        let mut fields: HashMap<Ulid, FieldState> = HashMap::new();

        for event in events {
            match event {
                Event::LocationCreated { id, name } => {
                    locations.insert(*id, LocationState::new(*id, name.clone()));
                }
                Event::GlobalClosureAdded { location_id, .. }
                | Event::GlobalClosureRemoved { location_id, .. } => {
                    if let Some(ls) = locations.get_mut(location_id) {
                        apply_to_location(ls, event);
                    }
                }
                Event::FieldCreated {
                    id,
                    location_id,
                    owner_id,
                    spec,
                } => {
                    fields.insert(*id, FieldState::new(*id, *location_id, *owner_id, spec.clone()));
                    store.location_fields.entry(*location_id).or_default().push(*id);
                }
                other => {
                    if let Some(field_id) = other.field_id()
                        && let Some(fs) = fields.get_mut(&field_id)
                    {
                        store.apply_to_field(fs, other);
                    }
                }
            }
        }

        for (id, ls) in locations {
            store.locations.insert(id, Arc::new(RwLock::new(ls)));
        }
        for (id, fs) in fields {
            store.fields.insert(id, Arc::new(RwLock::new(fs)));
        }
        store
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn location(&self, id: &Ulid) -> Result<SharedLocation, EngineError> {
        self.locations
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn field(&self, id: &Ulid) -> Result<SharedField, EngineError> {
        self.fields
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn field_for_booking(&self, booking_id: &Ulid) -> Result<Ulid, EngineError> {
        self.booking_to_field
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*booking_id))
    }

    pub fn contains_location(&self, id: &Ulid) -> bool {
        self.locations.contains_key(id)
    }

    pub fn contains_field(&self, id: &Ulid) -> bool {
        self.fields.contains_key(id)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_ids(&self) -> Vec<Ulid> {
        self.fields.iter().map(|e| *e.key()).collect()
    }

    pub fn fields_of_location(&self, location_id: &Ulid) -> Vec<Ulid> {
        self.location_fields
            .get(location_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ── Inserts ──────────────────────────────────────────────

    pub fn insert_location(&self, ls: LocationState) {
        self.locations.insert(ls.id, Arc::new(RwLock::new(ls)));
    }

    pub fn insert_field(&self, fs: FieldState) {
        self.location_fields.entry(fs.location_id).or_default().push(fs.id);
        self.fields.insert(fs.id, Arc::new(RwLock::new(fs)));
    }

    // ── Event application ────────────────────────────────────

    /// Apply a field-scoped event. The caller holds the field's write lock.
    pub fn apply_to_field(&self, fs: &mut FieldState, event: &Event) {
        match event {
            Event::FieldUpdated { spec, .. } => {
                fs.spec = spec.clone();
            }
            Event::FieldRetired { .. } => {
                fs.retired = true;
            }
            Event::OperatingHoursSet { hours, .. } => {
                if let Some(slot) = fs.hours.get_mut(usize::from(hours.day)) {
                    *slot = Some(*hours);
                }
            }
            Event::OperatingHoursCleared { day, .. } => {
                if let Some(slot) = fs.hours.get_mut(usize::from(*day)) {
                    *slot = None;
                }
            }
            Event::FieldClosureAdded { id, span, reason, .. } => {
                insert_sorted(
                    &mut fs.closures,
                    Closure {
                        id: *id,
                        span: *span,
                        reason: reason.clone(),
                    },
                );
            }
            Event::FieldClosureRemoved { id, .. } => {
                fs.closures.retain(|c| c.id != *id);
            }
            Event::BookingCreated { booking } => {
                fs.remove_booking(booking.id);
                insert_sorted(&mut fs.bookings, booking.clone());
                self.booking_to_field.insert(booking.id, fs.id);
            }
            Event::BookingConfirmed { id, at, .. } => {
                if let Some(b) = fs.booking_mut(*id) {
                    b.status = BookingStatus::Confirmed;
                    b.updated_at = *at;
                }
            }
            Event::BookingCancelled { id, by, at, .. } => {
                if let Some(b) = fs.booking_mut(*id) {
                    b.status = BookingStatus::Cancelled;
                    b.cancelled_by = Some(*by);
                    b.updated_at = *at;
                }
            }
            Event::BookingExpired { id, at, .. } => {
                if let Some(b) = fs.booking_mut(*id) {
                    b.status = BookingStatus::Expired;
                    b.updated_at = *at;
                }
            }
            Event::BookingRescheduled {
                id,
                span,
                amount_cents,
                at,
                ..
            } => {
                // Re-insert to keep start order.
                if let Some(mut b) = fs.remove_booking(*id) {
                    b.span = *span;
                    b.amount_cents = *amount_cents;
                    b.updated_at = *at;
                    insert_sorted(&mut fs.bookings, b);
                }
            }
            // Location events and field creation are handled at the map level, not here
            Event::LocationCreated { .. }
            | Event::GlobalClosureAdded { .. }
            | Event::GlobalClosureRemoved { .. }
            | Event::FieldCreated { .. } => {}
        }
    }

    /// Events that recreate the current state, for WAL compaction.
    /// The caller must keep writers out for the duration.
    pub async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        let locations: Vec<SharedLocation> = self.locations.iter().map(|e| e.value().clone()).collect();
        for location in locations {
            let ls = location.read().await;
            events.push(Event::LocationCreated {
                id: ls.id,
                name: ls.name.clone(),
            });
            for c in &ls.closures {
                events.push(Event::GlobalClosureAdded {
                    id: c.id,
                    location_id: ls.id,
                    span: c.span,
                    reason: c.reason.clone(),
                });
            }
        }

        let fields: Vec<SharedField> = self.fields.iter().map(|e| e.value().clone()).collect();
        for field in fields {
            let fs = field.read().await;
            events.push(Event::FieldCreated {
                id: fs.id,
                location_id: fs.location_id,
                owner_id: fs.owner_id,
                spec: fs.spec.clone(),
            });
            for hours in fs.hours.iter().flatten() {
                events.push(Event::OperatingHoursSet {
                    field_id: fs.id,
                    hours: *hours,
                });
            }
            for c in &fs.closures {
                events.push(Event::FieldClosureAdded {
                    id: c.id,
                    field_id: fs.id,
                    span: c.span,
                    reason: c.reason.clone(),
                });
            }
            for b in &fs.bookings {
                events.push(Event::BookingCreated { booking: b.clone() });
            }
            if fs.retired {
                events.push(Event::FieldRetired { id: fs.id });
            }
        }

        events
    }
}

/// Apply a location-scoped event. The caller holds the location's write lock.
pub fn apply_to_location(ls: &mut LocationState, event: &Event) {
    match event {
        Event::GlobalClosureAdded { id, span, reason, .. } => {
            insert_sorted(
                &mut ls.closures,
                Closure {
                    id: *id,
                    span: *span,
                    reason: reason.clone(),
                },
            );
        }
        Event::GlobalClosureRemoved { id, .. } => {
            ls.closures.retain(|c| c.id != *id);
        }
        _ => {}
    }
}
