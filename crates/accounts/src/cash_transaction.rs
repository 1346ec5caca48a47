//! Ledger entry (cash transaction): the append-only journal of money movements.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerbank_core::{
    Currency, Entity, EventRecorder, LedgerEntryId, Money, ValidationErrors, exact_amount,
};

use crate::events::{BankingEvent, LedgerEntryCreated};
use crate::iban::Iban;
use crate::link::LinkRole;

const MAX_DESCRIPTION_LEN: usize = 250;
const MAX_REFERENCE_LEN: usize = 64;
const MAX_NAME_LEN: usize = 120;
/// Clock skew tolerated on caller-supplied transaction dates.
const FUTURE_DATE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Deposit,
    Withdrawal,
    Transfer,
    /// Instant transfer; same rules as `Transfer`.
    Fast,
}

string_enum!(MovementType {
    Deposit => "deposit",
    Withdrawal => "withdrawal",
    Transfer => "transfer",
    Fast => "fast",
});

impl MovementType {
    pub fn is_transfer(&self) -> bool {
        matches!(self, MovementType::Transfer | MovementType::Fast)
    }
}

/// Where the movement was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Branch,
    Atm,
    InternetBanking,
    MobileBanking,
    Api,
}

string_enum!(Channel {
    Branch => "branch",
    Atm => "atm",
    InternetBanking => "internet_banking",
    MobileBanking => "mobile_banking",
    Api => "api",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentCategory {
    #[default]
    General,
    Bills,
    Rent,
    Salary,
    Shopping,
    Education,
    Other,
}

string_enum!(PaymentCategory {
    General => "general",
    Bills => "bills",
    Rent => "rent",
    Salary => "salary",
    Shopping => "shopping",
    Education => "education",
    Other => "other",
});

/// Pending → Completed. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
}

string_enum!(TransactionStatus {
    Pending => "pending",
    Completed => "completed",
});

/// Input to [`CashTransaction::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCashTransaction {
    pub movement_type: MovementType,
    pub channel: Channel,
    pub from: Option<Iban>,
    pub to: Option<Iban>,
    pub amount: Decimal,
    pub currency: Currency,
    pub fee: Decimal,
    pub description: String,
    pub sender_available_balance: Option<Money>,
    pub recipient_available_balance: Option<Money>,
    pub payment_category: PaymentCategory,
    pub transaction_date: DateTime<Utc>,
    pub sender_name: Option<String>,
    pub recipient_name: Option<String>,
    /// Generated from the entry id when absent.
    pub reference_number: Option<String>,
}

/// Persisted shape of a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashTransactionRecord {
    pub id: LedgerEntryId,
    pub reference_number: String,
    pub movement_type: MovementType,
    pub channel: Channel,
    pub from: Option<Iban>,
    pub to: Option<Iban>,
    pub amount: Money,
    pub fee: Money,
    pub description: String,
    pub sender_available_balance: Option<Money>,
    pub recipient_available_balance: Option<Money>,
    pub payment_category: PaymentCategory,
    pub transaction_date: DateTime<Utc>,
    pub status: TransactionStatus,
    pub sender_name: Option<String>,
    pub recipient_name: Option<String>,
}

/// Immutable journal record of one money movement.
///
/// Only `status` may change after creation, and only towards `Completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashTransaction {
    record: CashTransactionRecord,
    events: Vec<BankingEvent>,
}

impl CashTransaction {
    /// Validated factory. Returns every violated rule on failure.
    pub fn create(new: NewCashTransaction) -> Result<Self, ValidationErrors> {
        validate(&new, Utc::now())?;

        let id = LedgerEntryId::new();
        let reference_number = new
            .reference_number
            .map(|r| r.trim().to_string())
            .unwrap_or_else(|| default_reference(id));

        let record = CashTransactionRecord {
            id,
            reference_number,
            movement_type: new.movement_type,
            channel: new.channel,
            from: new.from,
            to: new.to,
            amount: Money::new(new.amount, new.currency),
            fee: Money::new(new.fee, new.currency),
            description: new.description.trim().to_string(),
            sender_available_balance: new.sender_available_balance,
            recipient_available_balance: new.recipient_available_balance,
            payment_category: new.payment_category,
            transaction_date: new.transaction_date,
            status: TransactionStatus::Pending,
            sender_name: new.sender_name,
            recipient_name: new.recipient_name,
        };

        let created = BankingEvent::LedgerEntryCreated(LedgerEntryCreated {
            entry_id: record.id,
            reference_number: record.reference_number.clone(),
            movement_type: record.movement_type,
            from: record.from.clone(),
            to: record.to.clone(),
            amount: record.amount,
            fee: record.fee,
            occurred_at: record.transaction_date,
        });

        Ok(Self {
            record,
            events: vec![created],
        })
    }

    /// Rehydrate a persisted entry (no validation, no events).
    pub fn restore(record: CashTransactionRecord) -> Self {
        Self {
            record,
            events: Vec::new(),
        }
    }

    pub fn to_record(&self) -> CashTransactionRecord {
        self.record.clone()
    }

    pub fn mark_completed(&mut self) {
        self.record.status = TransactionStatus::Completed;
    }

    pub fn is_completed(&self) -> bool {
        self.record.status == TransactionStatus::Completed
    }

    /// Side of the movement `iban` was on, if it took part at all.
    pub fn involves(&self, iban: &Iban) -> Option<LinkRole> {
        if self.record.from.as_ref() == Some(iban) {
            Some(LinkRole::Sender)
        } else if self.record.to.as_ref() == Some(iban) {
            Some(LinkRole::Recipient)
        } else {
            None
        }
    }

    pub fn entry_id(&self) -> LedgerEntryId {
        self.record.id
    }

    pub fn reference_number(&self) -> &str {
        &self.record.reference_number
    }

    pub fn movement_type(&self) -> MovementType {
        self.record.movement_type
    }

    pub fn channel(&self) -> Channel {
        self.record.channel
    }

    pub fn from(&self) -> Option<&Iban> {
        self.record.from.as_ref()
    }

    pub fn to(&self) -> Option<&Iban> {
        self.record.to.as_ref()
    }

    pub fn amount(&self) -> Money {
        self.record.amount
    }

    pub fn fee(&self) -> Money {
        self.record.fee
    }

    pub fn currency(&self) -> Currency {
        self.record.amount.currency()
    }

    pub fn description(&self) -> &str {
        &self.record.description
    }

    pub fn sender_available_balance(&self) -> Option<Money> {
        self.record.sender_available_balance
    }

    pub fn recipient_available_balance(&self) -> Option<Money> {
        self.record.recipient_available_balance
    }

    pub fn payment_category(&self) -> PaymentCategory {
        self.record.payment_category
    }

    pub fn transaction_date(&self) -> DateTime<Utc> {
        self.record.transaction_date
    }

    pub fn status(&self) -> TransactionStatus {
        self.record.status
    }

    pub fn sender_name(&self) -> Option<&str> {
        self.record.sender_name.as_deref()
    }

    pub fn recipient_name(&self) -> Option<&str> {
        self.record.recipient_name.as_deref()
    }
}

impl Entity for CashTransaction {
    type Id = LedgerEntryId;

    fn id(&self) -> &Self::Id {
        &self.record.id
    }
}

impl EventRecorder for CashTransaction {
    type Event = BankingEvent;

    fn pending_events(&self) -> &[Self::Event] {
        &self.events
    }

    fn take_events(&mut self) -> Vec<Self::Event> {
        std::mem::take(&mut self.events)
    }
}

fn default_reference(id: LedgerEntryId) -> String {
    format!("TX{}", id.as_uuid().simple()).to_uppercase()
}

fn validate(new: &NewCashTransaction, now: DateTime<Utc>) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    errors.ensure(new.amount > Decimal::ZERO, "amount must be greater than zero");
    errors.ensure(
        exact_amount(new.amount).is_ok(),
        "amount must have at most two decimal places and fit the supported range",
    );
    errors.ensure(new.fee >= Decimal::ZERO, "fee cannot be negative");

    match new.movement_type {
        MovementType::Deposit => {
            errors.ensure(new.to.is_some(), "recipient iban is required for a deposit");
            errors.ensure(new.from.is_none(), "a deposit has no sender iban");
        }
        MovementType::Withdrawal => {
            errors.ensure(new.from.is_some(), "sender iban is required for a withdrawal");
            errors.ensure(new.to.is_none(), "a withdrawal has no recipient iban");
        }
        MovementType::Transfer | MovementType::Fast => {
            errors.ensure(new.from.is_some(), "sender iban is required for a transfer");
            errors.ensure(new.to.is_some(), "recipient iban is required for a transfer");
            if let (Some(from), Some(to)) = (&new.from, &new.to) {
                errors.ensure(from != to, "sender and recipient iban must differ");
            }
        }
    }

    errors.ensure(
        new.description.trim().chars().count() <= MAX_DESCRIPTION_LEN,
        format!("description cannot exceed {MAX_DESCRIPTION_LEN} characters"),
    );

    if let Some(reference) = &new.reference_number {
        let reference = reference.trim();
        errors.ensure(!reference.is_empty(), "reference number cannot be blank");
        errors.ensure(
            reference.len() <= MAX_REFERENCE_LEN,
            format!("reference number cannot exceed {MAX_REFERENCE_LEN} characters"),
        );
        errors.ensure(
            reference.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'),
            "reference number may only contain letters, digits and '-'",
        );
    }

    errors.ensure(
        new.transaction_date <= now + Duration::seconds(FUTURE_DATE_TOLERANCE_SECS),
        "transaction date cannot be in the future",
    );

    let snapshots = [new.sender_available_balance, new.recipient_available_balance];
    errors.ensure(
        snapshots.iter().flatten().all(|m| m.currency() == new.currency),
        "balance snapshot currency must match the transaction currency",
    );

    for name in [&new.sender_name, &new.recipient_name].into_iter().flatten() {
        errors.ensure(
            name.chars().count() <= MAX_NAME_LEN,
            format!("display names cannot exceed {MAX_NAME_LEN} characters"),
        );
    }

    errors.into_result(|| ())
}
