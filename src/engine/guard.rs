use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::time::Instant;

use tokio::sync::{MutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::{error, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::conflict::check_exclusion;
use super::{Engine, EngineError, wal_append};

/// Exclusive access to one field for the length of a mutation: the field's
/// write lock plus a shared hold on the commit gate. Dropping it releases both.
pub(super) struct FieldGuard {
    field: OwnedRwLockWriteGuard<FieldState>,
    _gate: OwnedRwLockReadGuard<()>,
}

impl Deref for FieldGuard {
    type Target = FieldState;

    fn deref(&self) -> &FieldState {
        &self.field
    }
}

impl DerefMut for FieldGuard {
    fn deref_mut(&mut self) -> &mut FieldState {
        &mut self.field
    }
}

/// Exclusive access to one location, same shape as [`FieldGuard`].
pub(super) struct LocationGuard {
    location: OwnedRwLockWriteGuard<LocationState>,
    _gate: OwnedRwLockReadGuard<()>,
}

impl Deref for LocationGuard {
    type Target = LocationState;

    fn deref(&self) -> &LocationState {
        &self.location
    }
}

impl DerefMut for LocationGuard {
    fn deref_mut(&mut self) -> &mut LocationState {
        &mut self.location
    }
}

/// Held while a location or field is being created.
pub(super) struct CatalogGuard<'a> {
    _create: MutexGuard<'a, ()>,
    _gate: OwnedRwLockReadGuard<()>,
}

impl Engine {
    /// Run `acquire` with the guard timeout. A timeout is `Busy(id)`; the
    /// dropped future releases whatever it had acquired so far.
    async fn bounded<T>(&self, id: Ulid, acquire: impl Future<Output = T>) -> Result<T, EngineError> {
        let started = Instant::now();
        match tokio::time::timeout(self.settings.guard_timeout, acquire).await {
            Ok(acquired) => {
                metrics::histogram!(observability::GUARD_WAIT_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                Ok(acquired)
            }
            Err(_) => {
                metrics::counter!(observability::GUARD_TIMEOUTS_TOTAL).increment(1);
                warn!("guard wait on {id} exceeded {:?}", self.settings.guard_timeout);
                Err(EngineError::Busy(id))
            }
        }
    }

    /// Serialize mutations of one field. Different fields never contend here.
    pub(super) async fn lock_field(&self, field_id: Ulid) -> Result<FieldGuard, EngineError> {
        let field = self.store.field(&field_id)?;
        let gate = self.commit_gate.clone();
        self.bounded(field_id, async move {
            let gate = gate.read_owned().await;
            let field = field.write_owned().await;
            FieldGuard { field, _gate: gate }
        })
        .await
    }

    pub(super) async fn lock_location(&self, location_id: Ulid) -> Result<LocationGuard, EngineError> {
        let location = self.store.location(&location_id)?;
        let gate = self.commit_gate.clone();
        self.bounded(location_id, async move {
            let gate = gate.read_owned().await;
            let location = location.write_owned().await;
            LocationGuard { location, _gate: gate }
        })
        .await
    }

    /// Shared hold on the commit gate plus the creation lock, for writes
    /// that add a new location or field under `id`.
    pub(super) async fn lock_catalog(&self, id: Ulid) -> Result<CatalogGuard<'_>, EngineError> {
        let gate = self.commit_gate.clone();
        self.bounded(id, async move {
            let gate = gate.read_owned().await;
            let create = self.create_lock.lock().await;
            CatalogGuard { _create: create, _gate: gate }
        })
        .await
    }

    pub(super) async fn read_field(&self, field_id: Ulid) -> Result<OwnedRwLockReadGuard<FieldState>, EngineError> {
        let field = self.store.field(&field_id)?;
        self.bounded(field_id, field.read_owned()).await
    }

    /// Read a location. Always taken after the field lock, never before.
    pub(super) async fn read_location(
        &self,
        location_id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<LocationState>, EngineError> {
        let location = self.store.location(&location_id)?;
        self.bounded(location_id, location.read_owned()).await
    }

    /// Commit a booking event and return the booking as stored.
    ///
    /// The commit runs in its own task that owns the guard: once started it
    /// finishes even if the caller is dropped, and the guard is released when
    /// it ends. Either the event is durable and applied, or neither.
    pub(super) async fn commit_booking(
        &self,
        mut guard: FieldGuard,
        event: Event,
        booking_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let wal_tx = self.wal_tx.clone();
        let store = self.store.clone();
        let notify = self.notify.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = check_exclusion(&guard, &event) {
                metrics::counter!(observability::INTEGRITY_VIOLATIONS_TOTAL).increment(1);
                error!("{e}");
                return Err(e);
            }
            wal_append(&wal_tx, &event).await?;
            store.apply_to_field(&mut guard, &event);
            notify.send(guard.id, &event);
            guard
                .booking(booking_id)
                .cloned()
                .ok_or_else(|| EngineError::Integrity(format!("booking {booking_id} missing after commit")))
        });

        task.await.map_err(|e| {
            error!("commit task for booking {booking_id} failed: {e}");
            EngineError::Integrity(format!("commit task failed: {e}"))
        })?
    }
}
