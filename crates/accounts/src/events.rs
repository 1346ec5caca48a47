//! Domain events raised by the ledger aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ledgerbank_core::{AccountId, LedgerEntryId, Money};
use ledgerbank_events::Event;

use crate::cash_transaction::MovementType;
use crate::iban::Iban;

pub const ACCOUNT_AGGREGATE: &str = "ledger.account";
pub const LEDGER_ENTRY_AGGREGATE: &str = "ledger.entry";

/// Event: AccountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub account_id: AccountId,
    pub iban: Iban,
    pub opening_balance: Money,
    pub is_active: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AccountActivated / AccountDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatusChanged {
    pub account_id: AccountId,
    pub iban: Iban,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LedgerEntryCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntryCreated {
    pub entry_id: LedgerEntryId,
    pub reference_number: String,
    pub movement_type: MovementType,
    pub from: Option<Iban>,
    pub to: Option<Iban>,
    pub amount: Money,
    pub fee: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BankingEvent {
    AccountOpened(AccountOpened),
    AccountActivated(AccountStatusChanged),
    AccountDeactivated(AccountStatusChanged),
    LedgerEntryCreated(LedgerEntryCreated),
}

impl BankingEvent {
    /// Id of the aggregate (or entity) that raised the event.
    pub fn source_id(&self) -> Uuid {
        match self {
            BankingEvent::AccountOpened(e) => e.account_id.into(),
            BankingEvent::AccountActivated(e) | BankingEvent::AccountDeactivated(e) => {
                e.account_id.into()
            }
            BankingEvent::LedgerEntryCreated(e) => e.entry_id.into(),
        }
    }

    pub fn source_type(&self) -> &'static str {
        match self {
            BankingEvent::LedgerEntryCreated(_) => LEDGER_ENTRY_AGGREGATE,
            _ => ACCOUNT_AGGREGATE,
        }
    }
}

impl Event for BankingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BankingEvent::AccountOpened(_) => "ledger.account.opened",
            BankingEvent::AccountActivated(_) => "ledger.account.activated",
            BankingEvent::AccountDeactivated(_) => "ledger.account.deactivated",
            BankingEvent::LedgerEntryCreated(_) => "ledger.entry.created",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BankingEvent::AccountOpened(e) => e.occurred_at,
            BankingEvent::AccountActivated(e) | BankingEvent::AccountDeactivated(e) => e.occurred_at,
            BankingEvent::LedgerEntryCreated(e) => e.occurred_at,
        }
    }
}
