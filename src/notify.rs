use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub keyed by room or person. Every committed event is published
/// as a JSON payload on the channels of the resources it touches, so
/// dashboards refresh on change instead of polling.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<String>>,
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

    /// Subscribe to notifications for a room or person. Creates the channel if needed.
    pub fn subscribe(&self, channel: Ulid) -> broadcast::Receiver<String> {
        let sender = self
            .channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, channel: Ulid, event: &Event) {
        let Some(sender) = self.channels.get(&channel) else { return };
        if sender.receiver_count() == 0 {
            return;
        }
        match serde_json::to_string(event) {
            Ok(payload) => {
                let _ = sender.send(payload);
            }
            Err(e) => tracing::warn!("dropping notification on {channel}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let proctor = Ulid::new();
        let mut rx = hub.subscribe(proctor);

        let assignment_id = Ulid::new();
        hub.send(proctor, &Event::MarkedAbsent { assignment_id });

        let payload = rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(v["MarkedAbsent"]["assignment_id"], assignment_id.to_string());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        hub.send(rid, &Event::CodeReset { assignment_id: rid });
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let hub = NotifyHub::new();
        let room = Ulid::new();
        let other = Ulid::new();
        let mut rx = hub.subscribe(room);
        hub.send(other, &Event::CodeReset { assignment_id: other });
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }
}
