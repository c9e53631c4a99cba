//! BroadcastHub - Live Dashboard Distribution
//!
//! ## Responsibilities
//!
//! - Subscriber inbox management for SSE connections
//! - Event broadcasting (access events to every connected dashboard)
//! - Keep-alive cadence for idle streams
//!
//! Publishing never blocks on a slow subscriber: inboxes are unbounded and
//! the publisher only appends. Unsubscription is tied to the subscription
//! guard so a disconnect cleans up exactly once.

use crate::command_relay::DoorController;
use crate::device_client::DoorCommandResult;
use crate::models::{AccessRecord, Notification};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Delivery tick for live streams: one pending event or one ping per tick
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

const PING_PAYLOAD: &str = r#"{"type":"ping"}"#;
const CONNECTED_PAYLOAD: &str = r#"{"type":"connected"}"#;

/// Events delivered to dashboard subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubEvent {
    Connected,
    Ping,
    NewVisitor(Notification),
    StreamFaceRecognized(Notification),
    StreamFaceDenied(Notification),
    FaceRecognitionComplete(Notification),
    AccessGrantedManual(AccessRecord),
    ManualCaptureWithRecognition(Notification),
    TelegramOpenDoor(DoorCommandNotice),
}

/// Payload of a `telegram_open_door` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoorCommandNotice {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl HubEvent {
    /// Serialized wire form, or `None` if serialization failed (logged)
    pub fn to_payload(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize hub event");
                None
            }
        }
    }
}

/// BroadcastHub instance
pub struct BroadcastHub {
    subscribers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new empty inbox. The returned subscription unregisters
    /// itself when dropped.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry().insert(id, tx);
        tracing::info!(subscriber_id = %id, "Dashboard client connected");
        Subscription {
            id,
            rx,
            hub: Arc::clone(self),
        }
    }

    fn unsubscribe(&self, id: &Uuid) {
        if self.registry().remove(id).is_some() {
            tracing::info!(subscriber_id = %id, "Dashboard client disconnected");
        }
    }

    /// Append the event to every currently registered inbox
    pub fn publish(&self, event: &HubEvent) {
        let Some(json) = event.to_payload() else {
            return;
        };

        let subscribers = self.registry();
        tracing::debug!(
            subscriber_count = subscribers.len(),
            "Broadcasting event to dashboard clients"
        );
        for (id, tx) in subscribers.iter() {
            if tx.send(json.clone()).is_err() {
                tracing::warn!(subscriber_id = %id, "Subscriber inbox closed");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::UnboundedSender<String>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One dashboard connection's inbox plus its unsubscribe guard
pub struct Subscription {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<String>,
    hub: Arc<BroadcastHub>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Initial payload emitted immediately on connect
    pub fn connected_payload() -> String {
        HubEvent::Connected
            .to_payload()
            .unwrap_or_else(|| CONNECTED_PAYLOAD.to_string())
    }

    /// One delivery tick: wait the keep-alive cadence, then emit the oldest
    /// pending event (FIFO, at most one per tick) or a ping.
    pub async fn next_payload(&mut self) -> String {
        tokio::time::sleep(KEEPALIVE_INTERVAL).await;
        match self.rx.try_recv() {
            Ok(payload) => payload,
            Err(_) => HubEvent::Ping
                .to_payload()
                .unwrap_or_else(|| PING_PAYLOAD.to_string()),
        }
    }

    /// Pop the oldest pending event without waiting (test/inspection hook)
    pub fn try_next(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.id);
    }
}

/// Door-control bridge injected into the command relay: instead of driving
/// the actuator directly, it publishes a `telegram_open_door` event and the
/// dashboard performs the actual opening.
pub struct HubDoorRelay {
    hub: Arc<BroadcastHub>,
}

impl HubDoorRelay {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl DoorController for HubDoorRelay {
    async fn open(&self) -> DoorCommandResult {
        tracing::info!("Telegram door command - notifying dashboard");
        self.hub.publish(&HubEvent::TelegramOpenDoor(DoorCommandNotice {
            message: "Telegram door open command received".to_string(),
            timestamp: Utc::now(),
        }));
        DoorCommandResult {
            success: true,
            message: "Command sent to dashboard".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessStatus, AcquisitionMethod, RecognitionOutcome};

    fn notification(filename: &str) -> Notification {
        let outcome = RecognitionOutcome {
            access_granted: false,
            status: AccessStatus::Denied,
            recognized_person: None,
        };
        crate::models::AccessRecord::new(filename, &outcome, AcquisitionMethod::Automatic)
            .to_notification()
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_events_in_publish_order() {
        let hub = Arc::new(BroadcastHub::new());
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(&HubEvent::NewVisitor(notification("a.jpg")));
        hub.publish(&HubEvent::NewVisitor(notification("b.jpg")));

        for sub in [&mut first, &mut second] {
            let one = sub.try_next().expect("first event");
            let two = sub.try_next().expect("second event");
            assert!(one.contains("a.jpg"));
            assert!(two.contains("b.jpg"));
            assert!(sub.try_next().is_none());
        }
    }

    #[tokio::test]
    async fn test_subscriber_joined_late_misses_earlier_events() {
        let hub = Arc::new(BroadcastHub::new());
        hub.publish(&HubEvent::NewVisitor(notification("early.jpg")));

        let mut sub = hub.subscribe();
        hub.publish(&HubEvent::NewVisitor(notification("late.jpg")));

        let payload = sub.try_next().expect("event after subscribe");
        assert!(payload.contains("late.jpg"));
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes_exactly_once() {
        let hub = Arc::new(BroadcastHub::new());
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        // Publishing with no subscribers is a no-op
        hub.publish(&HubEvent::Ping);
    }

    #[tokio::test]
    async fn test_unit_events_carry_no_data() {
        let payload = HubEvent::Connected.to_payload().expect("payload");
        let value: serde_json::Value = serde_json::from_str(&payload).expect("json");
        assert_eq!(value["type"], "connected");
        assert!(value.get("data").is_none());
    }

    #[tokio::test]
    async fn test_event_payload_is_type_tagged() {
        let payload = HubEvent::NewVisitor(notification("v.jpg"))
            .to_payload()
            .expect("payload");
        let value: serde_json::Value = serde_json::from_str(&payload).expect("json");
        assert_eq!(value["type"], "new_visitor");
        assert_eq!(value["data"]["filename"], "v.jpg");
    }

    #[tokio::test]
    async fn test_hub_door_relay_publishes_door_event() {
        let hub = Arc::new(BroadcastHub::new());
        let mut sub = hub.subscribe();
        let relay = HubDoorRelay::new(Arc::clone(&hub));

        let result = relay.open().await;
        assert!(result.success);

        let payload = sub.try_next().expect("door event");
        let value: serde_json::Value = serde_json::from_str(&payload).expect("json");
        assert_eq!(value["type"], "telegram_open_door");
    }
}
