//! Infrastructure layer: persistence, the unit of work, the outbox and the
//! movement handlers that tie them to the ledger domain.

pub mod config;
pub mod event_channel;
pub mod movements;
pub mod outbox;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, LedgerConfig};
pub use event_channel::DomainEventChannel;
pub use movements::{
    AccountAdministration, AccountReceipt, Actor, DepositCommand, DepositHandler, MovementError,
    MovementErrorCode, MovementReceipt, TransferCommand, TransferHandler, TransferKind,
    WithdrawalCommand, WithdrawalHandler,
};
pub use outbox::{
    BusPublisher, LogPublisher, NewOutboxMessage, OutboundPublisher, OutboxMessage, OutboxRelay,
    OutboxStore, PublishError, RelayReport,
};
pub use store::{
    AccountStore, ChangeSet, CommitOutcome, InMemoryLedgerStore, InMemoryUnit, PostgresLedgerStore,
    PostgresUnit, PreparedCommit, StoreError, TransactionCoordinator, UnitOfWork,
};
