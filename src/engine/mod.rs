mod availability;
mod bookings;
mod closures;
mod conflict;
mod error;
mod guard;
mod hours;
mod mutations;
mod queries;
mod store;

pub use availability::{Decision, Rejection, free_spans, merge_overlapping, resolve, subtract_intervals};
pub use closures::{Blocked, ClosureScope, blocked_intervals};
pub use error::EngineError;
pub use hours::{check_hours, open_window};
pub use store::{SharedField, SharedLocation, Store};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::info;

use crate::clock::Clock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use guard::FieldGuard;

/// Tunables the engine needs at runtime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Reference zone for days of week, midnight and opening hours.
    pub zone: FixedOffset,
    /// How long a pending booking waits for payment before it may expire.
    pub hold_duration_ms: Ms,
    /// Upper bound on waiting for a field's guard.
    pub guard_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            zone: Utc.fix(),
            hold_duration_ms: 15 * MINUTE_MS,
            guard_timeout: Duration::from_secs(2),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Single flush_sync for the whole batch.
/// 4. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Flush what we have first, then handle the non-append command.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        flush_and_respond(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// All or nothing: on any error the WAL has already rolled the whole batch
/// back, and every sender is told it failed.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    for (event, _) in batch {
        wal.append_buffered(event)?;
    }
    wal.flush_sync()
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            flush_and_respond(wal, &mut batch);
        }
    }
}

/// Send one event to the WAL writer and wait until it is durable.
pub(super) async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

pub struct Engine {
    pub(super) store: Arc<Store>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) settings: EngineSettings,
    pub(super) clock: Arc<dyn Clock>,
    /// Shared by every writer from WAL append through in-memory apply;
    /// taken exclusively by compaction so its snapshot matches the log.
    pub(super) commit_gate: Arc<RwLock<()>>,
    /// Serializes creation of locations and fields so ids stay unique.
    pub(super) create_lock: Mutex<()>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path, replay.valid_len)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Store::from_events(&replay.events);
        info!(
            "replayed {} events from {}: {} fields",
            replay.events.len(),
            wal_path.display(),
            store.field_count()
        );

        Ok(Self {
            store: Arc::new(store),
            wal_tx,
            notify,
            settings,
            clock,
            commit_gate: Arc::new(RwLock::new(())),
            create_lock: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// WAL-append + apply + notify for a field-scoped catalog change,
    /// under a guard the caller already holds.
    async fn persist_and_apply(&self, guard: &mut FieldGuard, event: &Event) -> Result<(), EngineError> {
        wal_append(&self.wal_tx, event).await?;
        self.store.apply_to_field(guard, event);
        self.notify.send(guard.id, event);
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let events = self.store.snapshot_events().await;
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
