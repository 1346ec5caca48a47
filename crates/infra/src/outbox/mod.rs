//! Transactional outbox.
//!
//! Events drained from aggregates are written to the outbox in the same
//! transaction as the balance change they describe. The [`OutboxRelay`]
//! later hands unpublished rows to an [`OutboundPublisher`] and marks them
//! published. Delivery is at-least-once; consumers deduplicate on `event_id`.

mod relay;

pub use relay::{OutboxRelay, RelayReport};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use ledgerbank_accounts::BankingEvent;
use ledgerbank_events::{Event, EventBus, EventEnvelope};

use crate::store::StoreError;

/// An event ready to be written to the outbox (no sequence yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOutboxMessage {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl NewOutboxMessage {
    pub fn from_event(event: &BankingEvent) -> Result<Self, StoreError> {
        let payload = serde_json::to_value(event)
            .map_err(|e| StoreError::Serialization(format!("event payload: {e}")))?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            aggregate_id: event.source_id(),
            aggregate_type: event.source_type().to_string(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }

    pub(crate) fn into_stored(self, sequence: u64) -> OutboxMessage {
        OutboxMessage {
            event_id: self.event_id,
            sequence,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            event_type: self.event_type,
            event_version: self.event_version,
            occurred_at: self.occurred_at,
            payload: self.payload,
            published_at: None,
        }
    }
}

/// A persisted outbox row. `sequence` is the global commit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub event_id: Uuid,
    pub sequence: u64,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence,
            self.event_type.clone(),
            self.occurred_at,
            self.payload.clone(),
        )
    }

    /// Decode the payload back into the typed event.
    pub fn decode(&self) -> Result<BankingEvent, StoreError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| StoreError::Serialization(format!("outbox payload {}: {e}", self.event_id)))
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}

/// Read/ack side of the outbox, used by the relay.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest unpublished messages first, at most `limit`.
    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError>;

    /// Returns how many rows were newly marked.
    async fn mark_published(&self, event_ids: &[Uuid], at: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error("publisher unavailable: {0}")]
    Unavailable(String),
}

/// Destination for outbox messages (broker, webhook, bus).
#[async_trait]
pub trait OutboundPublisher: Send + Sync {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError>;
}

/// Publishes outbox messages as envelopes on an in-process [`EventBus`].
#[derive(Debug, Clone)]
pub struct BusPublisher<B> {
    bus: B,
}

impl<B> BusPublisher<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl<B> OutboundPublisher for BusPublisher<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        self.bus
            .publish(message.to_envelope())
            .map_err(|e| PublishError::Unavailable(format!("{e:?}")))
    }
}

/// Writes each message to the log. Stand-in sink for the relay binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl OutboundPublisher for LogPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        info!(
            event_id = %message.event_id,
            sequence = message.sequence,
            event_type = %message.event_type,
            aggregate_id = %message.aggregate_id,
            payload = %message.payload,
            "outbound event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledgerbank_accounts::{AccountStatusChanged, Iban};
    use ledgerbank_core::AccountId;
    use ledgerbank_events::InMemoryEventBus;
    use std::sync::Arc;

    fn deactivated() -> BankingEvent {
        BankingEvent::AccountDeactivated(AccountStatusChanged {
            account_id: AccountId::new(),
            iban: Iban::parse("GB82 WEST 1234 5698 7654 32").unwrap(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn message_carries_event_metadata_and_decodes_back() {
        let event = deactivated();
        let message = NewOutboxMessage::from_event(&event).unwrap().into_stored(3);

        assert_eq!(message.event_type, "ledger.account.deactivated");
        assert_eq!(message.aggregate_id, event.source_id());
        assert_eq!(message.event_version, 1);
        assert!(!message.is_published());
        assert_eq!(message.decode().unwrap(), event);

        let envelope = message.to_envelope();
        assert_eq!(envelope.sequence_number(), 3);
        assert_eq!(envelope.event_id(), message.event_id);
    }

    #[tokio::test]
    async fn bus_publisher_forwards_envelopes() {
        let bus = Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new());
        let subscription = bus.subscribe();
        let publisher = BusPublisher::new(bus.clone());

        let message = NewOutboxMessage::from_event(&deactivated()).unwrap().into_stored(1);
        publisher.publish(&message).await.unwrap();

        let received = subscription.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event_type(), "ledger.account.deactivated");
    }
}
