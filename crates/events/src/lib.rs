//! Domain event mechanics: event contract, envelopes and pub/sub.
//!
//! No business rules live here; the ledger crates define their own event
//! types and implement [`Event`] for them.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
