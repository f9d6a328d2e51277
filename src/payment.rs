use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::{Actor, Booking};
use crate::observability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentOutcome {
    Paid,
    Failed,
}

impl PaymentOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentOutcome::Paid => "paid",
            PaymentOutcome::Failed => "failed",
        }
    }
}

/// An outcome reported by the payment collaborator. Untrusted: the booking
/// may be unknown, already settled, or expired by the time it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub booking_id: Ulid,
    pub outcome: PaymentOutcome,
}

/// Parse the line format `<booking-ulid> paid|failed`.
impl FromStr for PaymentEvent {
    type Err = &'static str;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let (Some(id), Some(outcome), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err("expected `<booking id> paid|failed`");
        };
        let booking_id = Ulid::from_string(id).map_err(|_| "booking id is not a ULID")?;
        let outcome = match outcome.to_ascii_lowercase().as_str() {
            "paid" => PaymentOutcome::Paid,
            "failed" => PaymentOutcome::Failed,
            _ => return Err("outcome must be `paid` or `failed`"),
        };
        Ok(Self { booking_id, outcome })
    }
}

/// Apply one payment outcome to its booking.
pub async fn apply_payment(engine: &Engine, event: PaymentEvent) -> Result<Booking, EngineError> {
    let result = match event.outcome {
        PaymentOutcome::Paid => engine.confirm_payment(event.booking_id).await,
        PaymentOutcome::Failed => engine.cancel_booking(event.booking_id, Actor::Payment).await,
    };
    let status = if result.is_ok() { "applied" } else { "rejected" };
    metrics::counter!(
        observability::PAYMENT_EVENTS_TOTAL,
        "outcome" => event.outcome.as_str(),
        "status" => status
    )
    .increment(1);
    result
}

/// Consume payment outcomes until the sending side closes. Busy fields are
/// retried once the guard frees up; every other refusal is logged.
pub async fn run_payment_listener(engine: Arc<Engine>, mut rx: mpsc::Receiver<PaymentEvent>) {
    while let Some(event) = rx.recv().await {
        let mut result = apply_payment(&engine, event).await;
        while let Err(e) = &result
            && e.is_retryable()
        {
            tokio::time::sleep(engine.settings().guard_timeout).await;
            result = apply_payment(&engine, event).await;
        }
        match result {
            Ok(booking) => info!(
                "payment {} for booking {}: now {}",
                event.outcome.as_str(),
                event.booking_id,
                booking.status
            ),
            Err(e) => warn!(
                "payment {} for booking {} not applied: {e}",
                event.outcome.as_str(),
                event.booking_id
            ),
        }
    }
    info!("payment listener stopped");
}
