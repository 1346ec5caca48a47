//! In-process notification of committed events.

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use ledgerbank_events::{EventBus, EventEnvelope};

use crate::outbox::OutboxMessage;

/// Publishes a commit's outbox messages on an in-process bus.
///
/// Fire-and-forget: a failed publish is logged and skipped. The outbox row
/// is already durable, so the relay still delivers it downstream.
#[derive(Debug, Clone)]
pub struct DomainEventChannel<B> {
    bus: B,
}

impl<B> DomainEventChannel<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Returns how many messages reached the bus.
    pub fn publish(&self, messages: &[OutboxMessage]) -> usize {
        let mut delivered = 0;
        for message in messages {
            match self.bus.publish(message.to_envelope()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    event_id = %message.event_id,
                    event_type = %message.event_type,
                    error = ?e,
                    "in-process event publish failed"
                ),
            }
        }
        debug!(delivered, total = messages.len(), "domain events published");
        delivered
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}
