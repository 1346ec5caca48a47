//! Ledger persistence: read access, units of work and their backends.
//!
//! ```text
//! TransactionCoordinator::begin_atomic → UnitOfWork
//!   load_account(..)            reads inside the unit
//!   changes().update_account(..) staged in memory
//!   commit()                    versions checked, rows + links + outbox written,
//!                               entries flipped to Completed, all in one transaction
//! ```
//!
//! Nothing reaches the backing store before `commit`. Dropping a unit without
//! committing discards it.

mod in_memory;
mod postgres;

pub use in_memory::{InMemoryLedgerStore, InMemoryUnit};
pub use postgres::{PostgresLedgerStore, PostgresUnit};

use async_trait::async_trait;
use thiserror::Error;

use ledgerbank_accounts::{
    AccountLedgerLink, AccountRecord, BankAccount, CashTransaction, CashTransactionRecord, Iban,
};
use ledgerbank_core::{AccountId, AggregateRoot, EventRecorder, LedgerEntryId};

use crate::outbox::{NewOutboxMessage, OutboxMessage};

/// Persistence failure.
///
/// Business outcomes (missing account, insufficient funds) never travel
/// through this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A staged account update was based on a stale version.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Read side of the ledger. Writes go through a [`UnitOfWork`].
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_by_iban(&self, iban: &Iban) -> Result<Option<BankAccount>, StoreError>;

    async fn get_by_id(&self, id: AccountId) -> Result<Option<BankAccount>, StoreError>;

    async fn exists_by_iban(&self, iban: &Iban) -> Result<bool, StoreError>;

    /// Entries linked to the account, oldest first.
    async fn ledger_entries_for(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<CashTransaction>, StoreError>;

    async fn get_ledger_entry(
        &self,
        id: LedgerEntryId,
    ) -> Result<Option<CashTransaction>, StoreError>;
}

/// Opens atomic units of work.
#[async_trait]
pub trait TransactionCoordinator: Send + Sync {
    type Unit: UnitOfWork;

    async fn begin_atomic(&self) -> Result<Self::Unit, StoreError>;
}

/// One atomic begin/commit/rollback envelope.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn load_account(&mut self, iban: &Iban) -> Result<Option<BankAccount>, StoreError>;

    async fn account_exists(&mut self, iban: &Iban) -> Result<bool, StoreError>;

    /// Staging area for this unit.
    fn changes(&mut self) -> &mut ChangeSet;

    /// Persist everything staged. Zero `rows_affected` means nothing was
    /// persisted; it is not an error at this level.
    async fn commit(self) -> Result<CommitOutcome, StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Mutations staged inside a unit of work.
#[derive(Debug, Default)]
pub struct ChangeSet {
    opened: Vec<BankAccount>,
    updated: Vec<BankAccount>,
    entries: Vec<CashTransaction>,
}

impl ChangeSet {
    pub fn open_account(&mut self, account: BankAccount) {
        self.opened.push(account);
    }

    /// Stage an updated account, replacing an earlier staging of the same id.
    pub fn update_account(&mut self, account: BankAccount) {
        match self.updated.iter_mut().find(|a| a.id() == account.id()) {
            Some(slot) => *slot = account,
            None => self.updated.push(account),
        }
    }

    pub fn record_entry(&mut self, entry: CashTransaction) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.updated.is_empty() && self.entries.is_empty()
    }

    /// Drain links and events from every staged aggregate into plain rows.
    ///
    /// Events leave the aggregates here whatever happens to the commit.
    pub fn prepare(self) -> Result<PreparedCommit, StoreError> {
        let mut prepared = PreparedCommit::default();
        let mut events = Vec::new();

        for mut account in self.opened {
            prepared.links.extend(account.take_ledger_links());
            events.extend(account.take_events());
            prepared.inserts.push(account.to_record());
        }
        for mut account in self.updated {
            prepared.links.extend(account.take_ledger_links());
            events.extend(account.take_events());
            prepared.updates.push(account.to_record());
        }
        for mut entry in self.entries {
            events.extend(entry.take_events());
            prepared.entries.push(entry.to_record());
        }

        prepared.messages = events
            .iter()
            .map(NewOutboxMessage::from_event)
            .collect::<Result<_, _>>()?;
        Ok(prepared)
    }
}

/// Row-level view of a [`ChangeSet`], ready for a backend to write.
///
/// `updates` carry the version they were loaded at; the backend bumps it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PreparedCommit {
    pub inserts: Vec<AccountRecord>,
    pub updates: Vec<AccountRecord>,
    pub entries: Vec<CashTransactionRecord>,
    pub links: Vec<AccountLedgerLink>,
    pub messages: Vec<NewOutboxMessage>,
}

impl PreparedCommit {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.entries.is_empty()
            && self.links.is_empty()
            && self.messages.is_empty()
    }
}

/// What a successful commit wrote.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    pub rows_affected: u64,
    /// Accounts as stored after the commit (new versions).
    pub accounts: Vec<AccountRecord>,
    /// Ledger entries, already `Completed`.
    pub entries: Vec<CashTransaction>,
    pub messages: Vec<OutboxMessage>,
}

impl CommitOutcome {
    pub fn entry(&self, id: LedgerEntryId) -> Option<&CashTransaction> {
        self.entries.iter().find(|e| e.entry_id() == id)
    }

    pub fn account(&self, id: AccountId) -> Option<&AccountRecord> {
        self.accounts.iter().find(|a| a.id == id)
    }
}

/// Completed copies of the committed entry records.
pub(crate) fn completed_entries(records: Vec<CashTransactionRecord>) -> Vec<CashTransaction> {
    records
        .into_iter()
        .map(|record| {
            let mut entry = CashTransaction::restore(record);
            entry.mark_completed();
            entry
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledgerbank_accounts::{
        AccountType, BalanceDirection, Channel, MovementType, NewAccount, NewCashTransaction,
        PaymentCategory,
    };
    use ledgerbank_core::BranchId;
    use rust_decimal_macros::dec;

    fn account() -> BankAccount {
        BankAccount::open(NewAccount {
            iban: "NL91ABNA0417164300".to_string(),
            account_number: "417164300".to_string(),
            account_type: Some(AccountType::Savings),
            branch_id: Some(BranchId::new()),
            currency: Some("EUR".to_string()),
            holder_name: "Grace Hopper".to_string(),
            opening_balance: Some(dec!(10)),
            minimum_allowed_balance: Some(dec!(0)),
            debt: None,
            is_active: true,
        })
        .unwrap()
    }

    #[test]
    fn prepare_drains_links_and_events() {
        let mut account = account();
        account.take_events();
        let balance = account.update_balance(dec!(5), BalanceDirection::Credit).unwrap();
        let entry = CashTransaction::create(NewCashTransaction {
            movement_type: MovementType::Deposit,
            channel: Channel::Atm,
            from: None,
            to: Some(account.iban().clone()),
            amount: dec!(5),
            currency: account.currency(),
            fee: dec!(0),
            description: String::new(),
            sender_available_balance: None,
            recipient_available_balance: Some(balance),
            payment_category: PaymentCategory::General,
            transaction_date: Utc::now(),
            sender_name: None,
            recipient_name: None,
            reference_number: None,
        })
        .unwrap();
        account.add_ledger_reference(&entry).unwrap();

        let mut changes = ChangeSet::default();
        changes.update_account(account.clone());
        changes.update_account(account);
        changes.record_entry(entry);

        let prepared = changes.prepare().unwrap();
        assert_eq!(prepared.updates.len(), 1);
        assert_eq!(prepared.links.len(), 1);
        assert_eq!(prepared.entries.len(), 1);
        assert_eq!(prepared.messages.len(), 1);
        assert_eq!(prepared.messages[0].event_type, "ledger.entry.created");
    }

    #[test]
    fn empty_change_set_prepares_nothing() {
        let changes = ChangeSet::default();
        assert!(changes.is_empty());
        assert!(changes.prepare().unwrap().is_empty());
    }
}
