//! Broadcast event bus the detection pipeline publishes into.
//!
//! Connected observers (the web layer's fan-out, the CLI's event printer,
//! tests) subscribe and receive every event published after they joined.
//! Publishing never blocks; with no subscribers the event is dropped.

use crate::model::{Alert, FileEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FileEvent,
    NetworkEvent,
    NetworkPacket,
    NewAlert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: serde_json::Value,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. Safe to call from any thread; a send with no live
    /// subscribers drops the event with a warning rather than blocking.
    pub fn publish(&self, kind: EventKind, data: serde_json::Value) {
        if self.tx.send(Event { kind, data }).is_err() {
            warn!(?kind, "no subscribers on event bus; event dropped");
        }
    }

    pub fn publish_file_event(&self, event: &FileEvent) {
        match serde_json::to_value(event) {
            Ok(data) => self.publish(EventKind::FileEvent, data),
            Err(err) => warn!(error = %err, "failed to serialize file event"),
        }
    }

    pub fn publish_alert(&self, alert: &Alert) {
        match serde_json::to_value(alert) {
            Ok(data) => self.publish(EventKind::NewAlert, data),
            Err(err) => warn!(error = %err, "failed to serialize alert"),
        }
    }

    pub fn publish_network_packet(&self, packet: serde_json::Value) {
        self.publish(EventKind::NetworkPacket, packet);
    }

    pub fn publish_network_event(&self, event: serde_json::Value) {
        self.publish(EventKind::NetworkEvent, event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileEvent, FileEventKind};

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let ev = FileEvent::new(FileEventKind::Modified, "/tmp/x", None);
        bus.publish_file_event(&ev);

        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, EventKind::FileEvent);
        assert_eq!(got.data["kind"], "modified");
        assert_eq!(got.data["path"], "/tmp/x");
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(EventKind::NetworkPacket, serde_json::json!({"size": 64}));
    }
}
