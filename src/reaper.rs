use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::observability;

/// Expire every pending booking whose payment deadline has passed.
/// Returns how many were expired.
pub async fn sweep_expired(engine: &Engine) -> usize {
    let now = engine.now_ms();
    let mut expired = 0;
    for booking_id in engine.collect_expired_bookings(now).await {
        match engine.expire_booking(booking_id).await {
            Ok(_) => {
                expired += 1;
                metrics::counter!(observability::HOLDS_EXPIRED_TOTAL).increment(1);
            }
            // Paid or cancelled since the scan, or the field is busy: next sweep.
            Err(e) => debug!("expiry skip {booking_id}: {e}"),
        }
    }
    expired
}

/// Background task that periodically expires unpaid holds.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        let expired = sweep_expired(&engine).await;
        if expired > 0 {
            info!("expired {expired} unpaid holds");
        }
        engine.notify.prune();
    }
    debug!("reaper stopped");
}

/// Background task that compacts the WAL once `threshold` appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            warn!("WAL compaction failed: {e}");
        }
    }
    debug!("compactor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::EngineSettings;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    /// 2024-01-01T00:00:00Z, a Monday.
    const MON: Ms = 1_704_067_200_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fieldbook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn engine_with_field(name: &str, clock: Arc<ManualClock>) -> (Arc<Engine>, Ulid) {
        let engine = Engine::new(
            test_wal_path(name),
            Arc::new(NotifyHub::new()),
            EngineSettings::default(),
            clock,
        )
        .unwrap();
        let location_id = Ulid::new();
        let field_id = Ulid::new();
        engine.create_location(location_id, "Harbour".into()).await.unwrap();
        engine
            .create_field(
                field_id,
                location_id,
                Ulid::new(),
                FieldSpec {
                    name: "Pitch A".into(),
                    category: None,
                    hourly_rate_cents: 4000,
                    field_type: FieldType { name: "7v7".into(), max_players: 14 },
                },
            )
            .await
            .unwrap();
        engine
            .set_operating_hours(field_id, OperatingHour { day: 0, opens: 0, closes: 1440 })
            .await
            .unwrap();
        (Arc::new(engine), field_id)
    }

    #[tokio::test]
    async fn sweep_expires_only_overdue_pending() {
        let clock = Arc::new(ManualClock::new(MON));
        let (engine, field_id) = engine_with_field("sweep_overdue.wal", clock.clone()).await;
        let booker = vec![BookingUser::booker(Ulid::new())];

        let unpaid = engine
            .create_booking(field_id, Span::new(MON + 9 * HOUR_MS, MON + 10 * HOUR_MS), 2, booker.clone())
            .await
            .unwrap();
        let paid = engine
            .create_booking(field_id, Span::new(MON + 11 * HOUR_MS, MON + 12 * HOUR_MS), 2, booker)
            .await
            .unwrap();
        engine.confirm_payment(paid.id).await.unwrap();

        // Nothing is due before the hold deadline.
        assert_eq!(sweep_expired(&engine).await, 0);

        clock.advance(engine.settings().hold_duration_ms);
        assert_eq!(engine.collect_expired_bookings(engine.now_ms()).await, vec![unpaid.id]);
        assert_eq!(sweep_expired(&engine).await, 1);

        assert_eq!(engine.get_booking(unpaid.id).await.unwrap().status, BookingStatus::Expired);
        assert_eq!(engine.get_booking(paid.id).await.unwrap().status, BookingStatus::Confirmed);
        assert_eq!(sweep_expired(&engine).await, 0);
    }

    #[tokio::test]
    async fn reaper_stops_on_shutdown() {
        let clock = Arc::new(ManualClock::new(MON));
        let (engine, _) = engine_with_field("reaper_shutdown.wal", clock).await;
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_reaper(engine, Duration::from_millis(10), shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn compactor_compacts_past_threshold() {
        let clock = Arc::new(ManualClock::new(MON));
        let (engine, _) = engine_with_field("compactor_threshold.wal", clock).await;
        assert!(engine.wal_appends_since_compact().await >= 3);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_compactor(
            engine.clone(),
            1,
            Duration::from_millis(10),
            shutdown.clone(),
        ));
        let mut compacted = false;
        for _ in 0..100 {
            if engine.wal_appends_since_compact().await == 0 {
                compacted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        task.await.unwrap();
        assert!(compacted);
    }
}
