use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use ledgerbank_accounts::{
    AccountLedgerLink, AccountRecord, BankAccount, CashTransaction, CashTransactionRecord, Iban,
    LinkRole, TransactionStatus,
};
use ledgerbank_core::{AccountId, ExpectedVersion, LedgerEntryId};

use crate::outbox::{OutboxMessage, OutboxStore};

use super::{
    AccountStore, ChangeSet, CommitOutcome, PreparedCommit, StoreError, TransactionCoordinator,
    UnitOfWork, completed_entries,
};

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<AccountId, AccountRecord>,
    by_iban: HashMap<Iban, AccountId>,
    entries: HashMap<LedgerEntryId, CashTransactionRecord>,
    by_reference: HashMap<String, LedgerEntryId>,
    links: BTreeMap<(AccountId, LedgerEntryId), LinkRole>,
    outbox: Vec<OutboxMessage>,
}

impl LedgerState {
    fn account_by_iban(&self, iban: &Iban) -> Option<&AccountRecord> {
        self.by_iban.get(iban).and_then(|id| self.accounts.get(id))
    }

    fn links_of(
        &self,
        account_id: AccountId,
    ) -> impl Iterator<Item = (&(AccountId, LedgerEntryId), &LinkRole)> {
        self.links
            .range((account_id, LedgerEntryId::from_uuid(Uuid::nil()))..)
            .take_while(move |((a, _), _)| *a == account_id)
    }

    fn check(&self, prepared: &PreparedCommit) -> Result<(), StoreError> {
        for record in &prepared.inserts {
            if self.accounts.contains_key(&record.id) || self.by_iban.contains_key(&record.iban) {
                return Err(StoreError::Duplicate(format!("account {}", record.iban)));
            }
        }
        for record in &prepared.updates {
            let stored = self.accounts.get(&record.id).ok_or_else(|| {
                StoreError::Concurrency(format!("account {} does not exist", record.id))
            })?;
            ExpectedVersion::Exact(record.version)
                .check(stored.version)
                .map_err(|e| StoreError::Concurrency(format!("account {}: {}", record.iban, e.message())))?;
        }
        for record in &prepared.entries {
            let clash = self.entries.contains_key(&record.id)
                || self.by_reference.contains_key(&record.reference_number);
            if clash {
                return Err(StoreError::Duplicate(format!(
                    "ledger entry {}",
                    record.reference_number
                )));
            }
        }
        for link in &prepared.links {
            if self.links.contains_key(&link.key()) {
                return Err(StoreError::Duplicate(format!(
                    "link {} -> {}",
                    link.account_id, link.ledger_entry_id
                )));
            }
        }
        Ok(())
    }

    /// Caller has run `check`; nothing below can fail.
    fn apply(&mut self, prepared: PreparedCommit) -> CommitOutcome {
        let mut rows = 0u64;
        let mut accounts = Vec::with_capacity(prepared.inserts.len() + prepared.updates.len());

        for record in prepared.inserts {
            self.by_iban.insert(record.iban.clone(), record.id);
            self.accounts.insert(record.id, record.clone());
            accounts.push(record);
            rows += 1;
        }
        for mut record in prepared.updates {
            record.version += 1;
            self.accounts.insert(record.id, record.clone());
            accounts.push(record);
            rows += 1;
        }
        for record in &prepared.entries {
            self.by_reference
                .insert(record.reference_number.clone(), record.id);
            self.entries.insert(record.id, record.clone());
            rows += 1;
        }
        for link in &prepared.links {
            self.links.insert(link.key(), link.role);
            rows += 1;
        }

        let mut messages = Vec::with_capacity(prepared.messages.len());
        for message in prepared.messages {
            let stored = message.into_stored(self.outbox.len() as u64 + 1);
            self.outbox.push(stored.clone());
            messages.push(stored);
            rows += 1;
        }

        for record in &prepared.entries {
            if let Some(stored) = self.entries.get_mut(&record.id) {
                stored.status = TransactionStatus::Completed;
                rows += 1;
            }
        }

        CommitOutcome {
            rows_affected: rows,
            accounts,
            entries: completed_entries(prepared.entries),
            messages,
        }
    }
}

/// Ledger store kept in process memory.
///
/// Clones share the same state. Intended for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every outbox row, published or not, in sequence order.
    pub fn outbox(&self) -> Result<Vec<OutboxMessage>, StoreError> {
        Ok(read(&self.state)?.outbox.clone())
    }

    pub fn links_for(&self, account_id: AccountId) -> Result<Vec<AccountLedgerLink>, StoreError> {
        let state = read(&self.state)?;
        Ok(state
            .links_of(account_id)
            .map(|((a, e), role)| AccountLedgerLink::new(*a, *e, *role))
            .collect())
    }
}

fn read(state: &RwLock<LedgerState>) -> Result<RwLockReadGuard<'_, LedgerState>, StoreError> {
    state.read().map_err(|_| StoreError::LockPoisoned)
}

fn write(state: &RwLock<LedgerState>) -> Result<RwLockWriteGuard<'_, LedgerState>, StoreError> {
    state.write().map_err(|_| StoreError::LockPoisoned)
}

#[async_trait]
impl AccountStore for InMemoryLedgerStore {
    async fn get_by_iban(&self, iban: &Iban) -> Result<Option<BankAccount>, StoreError> {
        let state = read(&self.state)?;
        Ok(state.account_by_iban(iban).cloned().map(BankAccount::restore))
    }

    async fn get_by_id(&self, id: AccountId) -> Result<Option<BankAccount>, StoreError> {
        let state = read(&self.state)?;
        Ok(state.accounts.get(&id).cloned().map(BankAccount::restore))
    }

    async fn exists_by_iban(&self, iban: &Iban) -> Result<bool, StoreError> {
        Ok(read(&self.state)?.by_iban.contains_key(iban))
    }

    async fn ledger_entries_for(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<CashTransaction>, StoreError> {
        let state = read(&self.state)?;
        let mut records: Vec<CashTransactionRecord> = state
            .links_of(account_id)
            .filter_map(|((_, e), _)| state.entries.get(e).cloned())
            .collect();
        records.sort_by(|a, b| (a.transaction_date, a.id).cmp(&(b.transaction_date, b.id)));
        Ok(records.into_iter().map(CashTransaction::restore).collect())
    }

    async fn get_ledger_entry(
        &self,
        id: LedgerEntryId,
    ) -> Result<Option<CashTransaction>, StoreError> {
        let state = read(&self.state)?;
        Ok(state.entries.get(&id).cloned().map(CashTransaction::restore))
    }
}

#[async_trait]
impl TransactionCoordinator for InMemoryLedgerStore {
    type Unit = InMemoryUnit;

    async fn begin_atomic(&self) -> Result<Self::Unit, StoreError> {
        Ok(InMemoryUnit {
            state: Arc::clone(&self.state),
            changes: ChangeSet::default(),
        })
    }
}

#[async_trait]
impl OutboxStore for InMemoryLedgerStore {
    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError> {
        let state = read(&self.state)?;
        Ok(state
            .outbox
            .iter()
            .filter(|m| !m.is_published())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, event_ids: &[Uuid], at: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = write(&self.state)?;
        let mut marked = 0;
        for message in state.outbox.iter_mut() {
            if message.published_at.is_none() && event_ids.contains(&message.event_id) {
                message.published_at = Some(at);
                marked += 1;
            }
        }
        Ok(marked)
    }
}

/// Unit of work over [`InMemoryLedgerStore`].
///
/// Reads see committed state only. The commit checks and applies the whole
/// change set under one write lock.
#[derive(Debug)]
pub struct InMemoryUnit {
    state: Arc<RwLock<LedgerState>>,
    changes: ChangeSet,
}

#[async_trait]
impl UnitOfWork for InMemoryUnit {
    async fn load_account(&mut self, iban: &Iban) -> Result<Option<BankAccount>, StoreError> {
        let state = read(&self.state)?;
        Ok(state.account_by_iban(iban).cloned().map(BankAccount::restore))
    }

    async fn account_exists(&mut self, iban: &Iban) -> Result<bool, StoreError> {
        Ok(read(&self.state)?.by_iban.contains_key(iban))
    }

    fn changes(&mut self) -> &mut ChangeSet {
        &mut self.changes
    }

    async fn commit(self) -> Result<CommitOutcome, StoreError> {
        let prepared = self.changes.prepare()?;
        if prepared.is_empty() {
            return Ok(CommitOutcome::default());
        }

        let mut state = write(&self.state)?;
        state.check(&prepared)?;
        let outcome = state.apply(prepared);
        debug!(rows = outcome.rows_affected, "in-memory unit committed");
        Ok(outcome)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        debug!("in-memory unit rolled back");
        Ok(())
    }
}
