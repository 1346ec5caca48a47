//! Account ↔ ledger-entry association rows.

use serde::{Deserialize, Serialize};

use ledgerbank_core::{AccountId, LedgerEntryId};

/// Which side of a movement the linked account was on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRole {
    /// Debited party (`from`).
    Sender,
    /// Credited party (`to`).
    Recipient,
}

impl LinkRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkRole::Sender => "sender",
            LinkRole::Recipient => "recipient",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sender" => Some(LinkRole::Sender),
            "recipient" => Some(LinkRole::Recipient),
            _ => None,
        }
    }
}

/// One row of the link table. Keyed by `(account_id, ledger_entry_id)`.
///
/// A transfer produces two rows pointing at the same entry; deposits and
/// withdrawals produce one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountLedgerLink {
    pub account_id: AccountId,
    pub ledger_entry_id: LedgerEntryId,
    pub role: LinkRole,
}

impl AccountLedgerLink {
    pub fn new(account_id: AccountId, ledger_entry_id: LedgerEntryId, role: LinkRole) -> Self {
        Self {
            account_id,
            ledger_entry_id,
            role,
        }
    }

    pub fn key(&self) -> (AccountId, LedgerEntryId) {
        (self.account_id, self.ledger_entry_id)
    }
}
