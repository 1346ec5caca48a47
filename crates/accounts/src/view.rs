//! Read-side projection of a ledger entry for one party.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use ledgerbank_core::{Currency, LedgerEntryId};

use crate::cash_transaction::{
    CashTransaction, Channel, MovementType, PaymentCategory, TransactionStatus,
};
use crate::iban::Iban;
use crate::link::LinkRole;

/// Ledger entry as seen by the sender or the recipient.
///
/// `amount` is negative for the debited party and positive for the credited
/// one; `available_balance` is that party's snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntryView {
    pub id: LedgerEntryId,
    pub reference_number: String,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub channel: Channel,
    pub from: Option<Iban>,
    pub to: Option<Iban>,
    pub sender_name: Option<String>,
    pub recipient_name: Option<String>,
    pub role: LinkRole,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: Currency,
    pub description: String,
    pub payment_category: PaymentCategory,
    pub transaction_date: DateTime<Utc>,
    pub status: TransactionStatus,
    pub available_balance: Option<Decimal>,
}

impl LedgerEntryView {
    /// `None` when `iban` is neither side of the entry.
    pub fn for_party(entry: &CashTransaction, iban: &Iban) -> Option<Self> {
        let role = entry.involves(iban)?;
        let (amount, snapshot) = match role {
            LinkRole::Sender => (-entry.amount().amount(), entry.sender_available_balance()),
            LinkRole::Recipient => (entry.amount().amount(), entry.recipient_available_balance()),
        };

        Some(Self {
            id: entry.entry_id(),
            reference_number: entry.reference_number().to_string(),
            movement_type: entry.movement_type(),
            channel: entry.channel(),
            from: entry.from().cloned(),
            to: entry.to().cloned(),
            sender_name: entry.sender_name().map(str::to_string),
            recipient_name: entry.recipient_name().map(str::to_string),
            role,
            amount,
            fee: entry.fee().amount(),
            currency: entry.currency(),
            description: entry.description().to_string(),
            payment_category: entry.payment_category(),
            transaction_date: entry.transaction_date(),
            status: entry.status(),
            available_balance: snapshot.map(|m| m.amount()),
        })
    }
}
