use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use fieldbook::clock::ManualClock;
use fieldbook::engine::{Decision, Engine, EngineError, EngineSettings, Rejection};
use fieldbook::model::*;
use fieldbook::notify::NotifyHub;
use fieldbook::payment::{self, PaymentEvent, PaymentOutcome};
use fieldbook::reaper;

/// 2024-01-01T00:00:00Z, a Monday.
const MON: Ms = 1_704_067_200_000;

// ── Test infrastructure ──────────────────────────────────────

struct Venue {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    location_id: Ulid,
    fields: Vec<Ulid>,
    _dir: PathBuf,
}

async fn open_venue(n_fields: usize) -> Venue {
    let dir = std::env::temp_dir().join(format!("fieldbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let clock = Arc::new(ManualClock::new(MON));
    let engine = Arc::new(
        Engine::new(
            dir.join("fieldbook.wal"),
            Arc::new(NotifyHub::new()),
            EngineSettings::default(),
            clock.clone(),
        )
        .unwrap(),
    );

    let location_id = Ulid::new();
    engine.create_location(location_id, "Meadow Park".into()).await.unwrap();
    let mut fields = Vec::new();
    for i in 0..n_fields {
        let id = Ulid::new();
        engine
            .create_field(
                id,
                location_id,
                Ulid::new(),
                FieldSpec {
                    name: format!("Pitch {}", i + 1),
                    category: Some("football".into()),
                    hourly_rate_cents: 8000,
                    field_type: FieldType { name: "7v7".into(), max_players: 14 },
                },
            )
            .await
            .unwrap();
        for day in 0..7 {
            engine
                .set_operating_hours(id, OperatingHour { day, opens: 7 * 60, closes: 23 * 60 })
                .await
                .unwrap();
        }
        fields.push(id);
    }

    Venue { engine, clock, location_id, fields, _dir: dir }
}

fn at(hour: Ms, minute: Ms) -> Ms {
    MON + hour * HOUR_MS + minute * MINUTE_MS
}

async fn recv_event(rx: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

async fn assert_no_event(rx: &mut broadcast::Receiver<Event>) {
    let got = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(got.is_err(), "unexpected event: {got:?}");
}

// ── Flows ────────────────────────────────────────────────────

#[tokio::test]
async fn pay_then_play() {
    let venue = open_venue(1).await;
    let field_id = venue.fields[0];
    let captain = Ulid::new();
    let mate = Ulid::new();
    let span = Span::new(at(19, 0), at(20, 30));

    assert_eq!(
        venue.engine.check_availability(field_id, span, None).await.unwrap(),
        Decision::Admit
    );
    let booking = venue
        .engine
        .create_booking(
            field_id,
            span,
            14,
            vec![BookingUser::booker(captain), BookingUser::guest(mate)],
        )
        .await
        .unwrap();
    assert_eq!(booking.amount_cents, 12_000);
    assert_eq!(booking.booker(), Some(captain));

    let (tx, rx) = mpsc::channel(4);
    let listener = tokio::spawn(payment::run_payment_listener(venue.engine.clone(), rx));
    tx.send(format!("{} paid", booking.id).parse::<PaymentEvent>().unwrap())
        .await
        .unwrap();
    drop(tx);
    listener.await.unwrap();

    let confirmed = venue.engine.get_booking(booking.id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);

    // The hold deadline no longer matters once paid.
    venue.clock.advance(DAY_MS);
    assert_eq!(reaper::sweep_expired(&venue.engine).await, 0);
    assert_eq!(
        venue.engine.check_availability(field_id, span, None).await.unwrap(),
        Decision::Reject(Rejection::SlotTaken { booking_id: booking.id })
    );

    let mine = venue.engine.bookings_for_user(mate).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, booking.id);
}

#[tokio::test]
async fn unpaid_hold_is_reaped_and_slot_reopens() {
    let venue = open_venue(1).await;
    let field_id = venue.fields[0];
    let span = Span::new(at(18, 0), at(19, 0));

    let hold = venue
        .engine
        .create_booking(field_id, span, 10, vec![BookingUser::booker(Ulid::new())])
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let reaper_task = tokio::spawn(reaper::run_reaper(
        venue.engine.clone(),
        Duration::from_millis(10),
        shutdown.clone(),
    ));

    venue.clock.advance(venue.engine.settings().hold_duration_ms);
    let mut reaped = false;
    for _ in 0..200 {
        if venue.engine.get_booking(hold.id).await.unwrap().status == BookingStatus::Expired {
            reaped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    reaper_task.await.unwrap();
    assert!(reaped, "hold was never expired");

    // A payment arriving after expiry is refused.
    let late = payment::apply_payment(
        &venue.engine,
        PaymentEvent { booking_id: hold.id, outcome: PaymentOutcome::Paid },
    )
    .await;
    assert!(matches!(late, Err(EngineError::InvalidTransition { .. })));

    venue
        .engine
        .create_booking(field_id, span, 10, vec![BookingUser::booker(Ulid::new())])
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_payment_releases_slot() {
    let venue = open_venue(1).await;
    let field_id = venue.fields[0];
    let span = Span::new(at(9, 0), at(10, 0));
    let booking = venue
        .engine
        .create_booking(field_id, span, 4, vec![BookingUser::booker(Ulid::new())])
        .await
        .unwrap();

    let cancelled = payment::apply_payment(
        &venue.engine,
        PaymentEvent { booking_id: booking.id, outcome: PaymentOutcome::Failed },
    )
    .await
    .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(Actor::Payment));
    assert!(venue.engine.check_availability(field_id, span, None).await.unwrap().is_admit());
}

// ── Change feed ──────────────────────────────────────────────

#[tokio::test]
async fn subscriber_sees_booking_lifecycle() {
    let venue = open_venue(1).await;
    let field_id = venue.fields[0];
    let mut rx = venue.engine.notify.subscribe(field_id);

    let booking = venue
        .engine
        .create_booking(
            field_id,
            Span::new(at(10, 0), at(11, 0)),
            2,
            vec![BookingUser::booker(Ulid::new())],
        )
        .await
        .unwrap();
    venue.engine.confirm_payment(booking.id).await.unwrap();
    venue.engine.cancel_booking(booking.id, Actor::System).await.unwrap();

    assert!(matches!(
        recv_event(&mut rx).await,
        Event::BookingCreated { booking: b } if b.id == booking.id
    ));
    assert!(matches!(
        recv_event(&mut rx).await,
        Event::BookingConfirmed { id, .. } if id == booking.id
    ));
    assert!(matches!(
        recv_event(&mut rx).await,
        Event::BookingCancelled { id, by: Actor::System, .. } if id == booking.id
    ));
}

#[tokio::test]
async fn events_stay_on_their_field() {
    let venue = open_venue(2).await;
    let mut first = venue.engine.notify.subscribe(venue.fields[0]);
    let mut second = venue.engine.notify.subscribe(venue.fields[1]);

    venue
        .engine
        .create_booking(
            venue.fields[1],
            Span::new(at(12, 0), at(13, 0)),
            2,
            vec![BookingUser::booker(Ulid::new())],
        )
        .await
        .unwrap();

    assert!(matches!(recv_event(&mut second).await, Event::BookingCreated { .. }));
    assert_no_event(&mut first).await;
}

#[tokio::test]
async fn global_closure_reaches_every_field() {
    let venue = open_venue(3).await;
    let mut receivers: Vec<_> = venue
        .fields
        .iter()
        .map(|id| venue.engine.notify.subscribe(*id))
        .collect();

    let closure_id = Ulid::new();
    let span = Span::new(at(0, 0), at(24, 0));
    venue
        .engine
        .add_global_closure(closure_id, venue.location_id, span, Some("tournament".into()))
        .await
        .unwrap();

    for rx in &mut receivers {
        assert!(matches!(
            recv_event(rx).await,
            Event::GlobalClosureAdded { id, .. } if id == closure_id
        ));
    }
    for field_id in &venue.fields {
        assert_eq!(
            venue
                .engine
                .check_availability(*field_id, Span::new(at(9, 0), at(10, 0)), None)
                .await
                .unwrap(),
            Decision::Reject(Rejection::FieldClosed { closure_id })
        );
        let blocked = venue.engine.closures_for(*field_id, span).await.unwrap();
        assert_eq!(blocked.len(), 1);
    }
}

// ── Restart ──────────────────────────────────────────────────

#[tokio::test]
async fn restart_keeps_every_field_consistent() {
    let venue = open_venue(2).await;
    let players: Vec<Ulid> = (0..4).map(|_| Ulid::new()).collect();
    let mut booked = Vec::new();
    for (i, player) in players.iter().enumerate() {
        let field_id = venue.fields[i % 2];
        let start = at(8 + i as Ms, 0);
        booked.push(
            venue
                .engine
                .create_booking(
                    field_id,
                    Span::new(start, start + HOUR_MS),
                    6,
                    vec![BookingUser::booker(*player)],
                )
                .await
                .unwrap(),
        );
    }
    venue.engine.confirm_payment(booked[0].id).await.unwrap();
    venue.engine.cancel_booking(booked[1].id, Actor::User(players[1])).await.unwrap();
    venue.engine.compact_wal().await.unwrap();
    venue.engine.confirm_payment(booked[2].id).await.unwrap();

    let wal_path = venue._dir.join("fieldbook.wal");
    let clock = venue.clock.clone();
    drop(venue.engine);

    let engine = Engine::new(wal_path, Arc::new(NotifyHub::new()), EngineSettings::default(), clock).unwrap();
    let statuses: Vec<BookingStatus> = {
        let mut out = Vec::new();
        for b in &booked {
            out.push(engine.get_booking(b.id).await.unwrap().status);
        }
        out
    };
    assert_eq!(
        statuses,
        vec![
            BookingStatus::Confirmed,
            BookingStatus::Cancelled,
            BookingStatus::Confirmed,
            BookingStatus::Pending,
        ]
    );
    assert_eq!(engine.list_fields(venue.location_id).await.unwrap().len(), 2);
}
