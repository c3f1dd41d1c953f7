//! Realtime notifier: dashboard events and their broadcast fan-out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use super::model::{Customer, Message};

/// Event pushed to every connected dashboard session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// A customer message was stored.
    NewMessage {
        id: i64,
        customer_name: String,
        customer_email: String,
        content: String,
        priority: u8,
        created_at: DateTime<Utc>,
    },
    /// An agent reply was stored against `message_id`.
    NewReply { message_id: i64, reply: ReplyEvent },
    /// Greeting sent to a session right after it connects.
    Connected { data: String },
}

/// The reply part of a `new_reply` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyEvent {
    pub id: i64,
    pub content: String,
    pub agent_name: String,
    pub created_at: DateTime<Utc>,
}

impl DashboardEvent {
    pub fn new_message(message: &Message, customer: &Customer) -> Self {
        Self::NewMessage {
            id: message.id,
            customer_name: customer.name.clone(),
            customer_email: customer.email.clone(),
            content: message.content.clone(),
            priority: message.priority,
            created_at: message.created_at,
        }
    }

    pub fn new_reply(original_id: i64, reply: &Message) -> Self {
        Self::NewReply {
            message_id: original_id,
            reply: ReplyEvent {
                id: reply.id,
                content: reply.content.clone(),
                agent_name: reply.agent_name.clone().unwrap_or_default(),
                created_at: reply.created_at,
            },
        }
    }

    pub fn connected() -> Self {
        Self::Connected {
            data: "Connected to server".into(),
        }
    }

    /// Event name as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::NewReply { .. } => "new_reply",
            Self::Connected { .. } => "connected",
        }
    }
}

/// Publishes dashboard events. Fire-and-forget: no ack, no replay.
pub trait Notifier: Send + Sync {
    fn publish(&self, event: DashboardEvent);
}

/// Fan-out to WebSocket sessions over a tokio broadcast channel.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<DashboardEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events published from now on. Each WS session calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, event: DashboardEvent) {
        let kind = event.kind();
        // ok if no session is listening
        match self.tx.send(event) {
            Ok(receivers) => debug!(kind, receivers, "Event broadcast"),
            Err(_) => debug!(kind, "Event dropped, no subscribers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::model::{Direction, MessageStatus};

    fn sample_message(id: i64, direction: Direction) -> Message {
        Message {
            id,
            customer_id: 1,
            content: "When is my loan disbursed?".into(),
            direction,
            agent_id: None,
            agent_name: Some("Grace".into()),
            status: MessageStatus::Unread,
            priority: 3,
            created_at: Utc::now(),
            replied_at: None,
        }
    }

    fn sample_customer() -> Customer {
        Customer {
            id: 1,
            customer_id: "CUST_1".into(),
            name: "Alice".into(),
            email: "alice@example.com".into(),
            phone: String::new(),
            profile_data: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn new_message_wire_shape() {
        let event = DashboardEvent::new_message(&sample_message(7, Direction::Incoming), &sample_customer());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["id"], 7);
        assert_eq!(json["customer_name"], "Alice");
        assert_eq!(json["customer_email"], "alice@example.com");
        assert_eq!(json["priority"], 3);
        assert!(json["created_at"].is_string());
    }

    #[test]
    fn new_reply_wire_shape() {
        let event = DashboardEvent::new_reply(7, &sample_message(8, Direction::Outgoing));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_reply");
        assert_eq!(json["message_id"], 7);
        assert_eq!(json["reply"]["id"], 8);
        assert_eq!(json["reply"]["agent_name"], "Grace");
    }

    #[test]
    fn connected_wire_shape() {
        let json = serde_json::to_value(DashboardEvent::connected()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "connected", "data": "Connected to server"})
        );
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let notifier = BroadcastNotifier::new(8);
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        notifier.publish(DashboardEvent::connected());

        assert_eq!(a.recv().await.unwrap(), DashboardEvent::connected());
        assert_eq!(b.recv().await.unwrap(), DashboardEvent::connected());
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let notifier = BroadcastNotifier::new(1);
        notifier.publish(DashboardEvent::connected());
        notifier.publish(DashboardEvent::connected());
    }

    #[tokio::test]
    async fn lagging_subscriber_keeps_receiving() {
        let notifier = BroadcastNotifier::new(2);
        let mut rx = notifier.subscribe();
        for id in 0..5 {
            notifier.publish(DashboardEvent::new_reply(id, &sample_message(id, Direction::Outgoing)));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        match rx.recv().await.unwrap() {
            DashboardEvent::NewReply { message_id, .. } => assert_eq!(message_id, 3),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
