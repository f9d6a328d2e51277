use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-field change feed for live calendars. Every committed event that
/// changes what a field's calendar shows is broadcast on that field's channel.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a field's feed. A slow subscriber that falls more than
    /// the channel capacity behind sees `RecvError::Lagged` and should re-read.
    pub fn subscribe(&self, field_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(field_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish to a field's feed. No-op if nobody ever subscribed.
    pub fn send(&self, field_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&field_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels whose subscribers have all gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    #[tokio::test]
    async fn subscriber_receives_field_events() {
        let hub = NotifyHub::new();
        let field_id = Ulid::new();
        let mut rx = hub.subscribe(field_id);

        let event = Event::OperatingHoursSet {
            field_id,
            hours: OperatingHour { day: 0, opens: 480, closes: 1320 },
        };
        hub.send(field_id, &event);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn feeds_are_per_field() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);

        hub.send(b, &Event::FieldRetired { id: b });
        hub.send(a, &Event::FieldRetired { id: a });
        assert_eq!(rx_a.recv().await.unwrap(), Event::FieldRetired { id: a });
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let id = Ulid::new();
        hub.send(id, &Event::FieldRetired { id });
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn prune_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let kept = hub.subscribe(Ulid::new());
        drop(hub.subscribe(Ulid::new()));
        assert_eq!(hub.channel_count(), 2);
        hub.prune();
        assert_eq!(hub.channel_count(), 1);
        drop(kept);
    }
}
