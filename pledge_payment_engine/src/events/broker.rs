use chrono::{DateTime, Utc};
use log::trace;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::{db_types::OutboxEvent, events::OutboxEventType};

#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Nobody is consuming. For at-least-once delivery this is a failed publish: the event stays unprocessed and is
    /// retried at the next relay poll.
    #[error("The broker has no active consumers")]
    NoConsumers,
    #[error("Broker publish failed: {0}")]
    PublishFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum MalformedEventError {
    #[error("Outbox event {id} carries an unknown event type '{event_type}'")]
    UnknownEventType { id: i64, event_type: String },
    #[error("Outbox event {id} carries a payload that is not valid JSON: {reason}")]
    InvalidPayload { id: i64, reason: String },
}

//--------------------------------------    BrokerMessage    ---------------------------------------------------------
/// The wire form of an outbox event. Consumers must be idempotent against redelivery: the relay marks an event
/// processed only after a positive acknowledgment, so a crash between publish and mark republishes the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub id: i64,
    pub aggregate_id: String,
    pub event_type: OutboxEventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub retry_count: i64,
}

impl TryFrom<&OutboxEvent> for BrokerMessage {
    type Error = MalformedEventError;

    /// Validates a stored event before publication. A failure here is the "malformed payload" condition: the relay
    /// logs it and lets the retry ceiling park the event instead of retrying it forever.
    fn try_from(event: &OutboxEvent) -> Result<Self, Self::Error> {
        let event_type = event.event_type.parse::<OutboxEventType>().map_err(|_| {
            MalformedEventError::UnknownEventType { id: event.id, event_type: event.event_type.clone() }
        })?;
        let payload = serde_json::from_str(&event.payload)
            .map_err(|e| MalformedEventError::InvalidPayload { id: event.id, reason: e.to_string() })?;
        Ok(Self {
            id: event.id,
            aggregate_id: event.aggregate_id.clone(),
            event_type,
            payload,
            created_at: event.created_at,
            retry_count: event.retry_count,
        })
    }
}

//--------------------------------------    EventPublisher   ---------------------------------------------------------
/// The broker seam. `publish` must return `Ok` only once the message has been accepted by the broker; the relay
/// treats anything else (including a timeout it applies itself) as a failed publish.
#[allow(async_fn_in_trait)]
pub trait EventPublisher: Clone {
    async fn publish(&self, message: &BrokerMessage) -> Result<(), BrokerError>;
}

//--------------------------------------    InMemoryBroker   ---------------------------------------------------------
/// A broadcast-channel broker for single-process deployments and tests. Every subscriber receives every message.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    sender: broadcast::Sender<BrokerMessage>,
}

impl InMemoryBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerMessage> {
        self.sender.subscribe()
    }
}

impl EventPublisher for InMemoryBroker {
    async fn publish(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        trace!("📨️ Publishing event {} ({})", message.id, message.event_type);
        self.sender.send(message.clone()).map(|_| ()).map_err(|_| BrokerError::NoConsumers)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db_types::OutboxEvent;

    fn event(event_type: &str, payload: &str) -> OutboxEvent {
        OutboxEvent {
            id: 1,
            aggregate_id: "pl-1".into(),
            event_type: event_type.into(),
            payload: payload.into(),
            created_at: Utc::now(),
            processed_at: None,
            retry_count: 0,
        }
    }

    #[test]
    fn valid_event_converts() {
        let msg = BrokerMessage::try_from(&event("PledgeCreated", r#"{"pledge_id":"pl-1"}"#)).unwrap();
        assert_eq!(msg.event_type, OutboxEventType::PledgeCreated);
        assert_eq!(msg.payload["pledge_id"], "pl-1");
    }

    #[test]
    fn malformed_events_are_rejected() {
        assert!(matches!(
            BrokerMessage::try_from(&event("SomethingElse", "{}")),
            Err(MalformedEventError::UnknownEventType { .. })
        ));
        assert!(matches!(
            BrokerMessage::try_from(&event("PledgeCreated", "not json")),
            Err(MalformedEventError::InvalidPayload { .. })
        ));
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let broker = InMemoryBroker::new(8);
        let mut rx1 = broker.subscribe();
        let mut rx2 = broker.subscribe();
        let msg = BrokerMessage::try_from(&event("PaymentCaptured", "{}")).unwrap();
        broker.publish(&msg).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap().id, 1);
        assert_eq!(rx2.recv().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn publish_without_consumers_fails() {
        let broker = InMemoryBroker::new(8);
        let msg = BrokerMessage::try_from(&event("PaymentCaptured", "{}")).unwrap();
        assert!(matches!(broker.publish(&msg).await, Err(BrokerError::NoConsumers)));
    }
}
