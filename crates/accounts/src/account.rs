//! Bank account aggregate: the only place balances change.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerbank_core::{
    AccountId, AggregateRoot, BranchId, Currency, DomainError, DomainResult, EventRecorder,
    MAX_AMOUNT, Money, ValidationErrors,
};

use crate::cash_transaction::CashTransaction;
use crate::events::{AccountOpened, AccountStatusChanged, BankingEvent};
use crate::iban::Iban;
use crate::link::AccountLedgerLink;

const MAX_ACCOUNT_NUMBER_LEN: usize = 34;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
    Business,
}

string_enum!(AccountType {
    Checking => "checking",
    Savings => "savings",
    Business => "business",
});

/// Direction of a balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceDirection {
    /// Add to the balance.
    Credit,
    /// Subtract from the balance.
    Debit,
}

/// Input to [`BankAccount::open`]. Optional fields are the ones the factory
/// reports as missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewAccount {
    pub iban: String,
    pub account_number: String,
    pub account_type: Option<AccountType>,
    pub branch_id: Option<BranchId>,
    pub currency: Option<String>,
    pub holder_name: String,
    pub opening_balance: Option<Decimal>,
    pub minimum_allowed_balance: Option<Decimal>,
    pub debt: Option<Decimal>,
    pub is_active: bool,
}

/// Persisted shape of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: AccountId,
    pub account_number: String,
    pub iban: Iban,
    pub account_type: AccountType,
    pub branch_id: BranchId,
    pub currency: Currency,
    pub holder_name: String,
    pub balance: Money,
    pub allowed_balance_to_use: Money,
    pub minimum_allowed_balance: Money,
    pub debt: Money,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: BankAccount.
///
/// Ledger entries are referenced through [`AccountLedgerLink`] rows, never
/// held directly. Links added during a request stay here until the unit of
/// work persists them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankAccount {
    record: AccountRecord,
    ledger_links: Vec<AccountLedgerLink>,
    events: Vec<BankingEvent>,
}

impl BankAccount {
    /// Validated factory for a brand-new account (version 0).
    pub fn open(new: NewAccount) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let iban = Iban::parse(&new.iban).map_err(|e| errors.push(e.message())).ok();

        let account_number = new.account_number.trim().to_string();
        errors.ensure(!account_number.is_empty(), "account number is required");
        errors.ensure(
            account_number.len() <= MAX_ACCOUNT_NUMBER_LEN
                && account_number.chars().all(|c| c.is_ascii_digit()),
            format!("account number must be at most {MAX_ACCOUNT_NUMBER_LEN} digits"),
        );
        errors.ensure(new.account_type.is_some(), "account type is required");
        errors.ensure(new.branch_id.is_some(), "branch is required");

        let currency = match new.currency.as_deref() {
            None => {
                errors.push("currency is required");
                None
            }
            Some(code) => code.parse::<Currency>().map_err(|e| errors.push(e.message())).ok(),
        };

        let holder_name = new.holder_name.trim().to_string();
        errors.ensure(!holder_name.is_empty(), "holder name is required");

        errors.ensure(new.opening_balance.is_some(), "opening balance is required");
        errors.ensure(
            new.minimum_allowed_balance.is_some(),
            "minimum allowed balance is required",
        );
        for (label, value) in [
            ("opening balance", new.opening_balance),
            ("minimum allowed balance", new.minimum_allowed_balance),
            ("debt", new.debt),
        ] {
            if let Some(v) = value {
                errors.ensure(v >= Decimal::ZERO, format!("{label} cannot be negative"));
                errors.ensure(v <= MAX_AMOUNT, format!("{label} is outside the supported range"));
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        // Every Option checked above; the fallbacks are unreachable.
        let (Some(iban), Some(currency), Some(account_type), Some(branch_id)) =
            (iban, currency, new.account_type, new.branch_id)
        else {
            return Err(ValidationErrors::single("account is incomplete"));
        };

        let balance = Money::new(new.opening_balance.unwrap_or_default(), currency);
        let record = AccountRecord {
            id: AccountId::new(),
            account_number,
            iban,
            account_type,
            branch_id,
            currency,
            holder_name,
            balance,
            allowed_balance_to_use: balance,
            minimum_allowed_balance: Money::new(
                new.minimum_allowed_balance.unwrap_or_default(),
                currency,
            ),
            debt: Money::new(new.debt.unwrap_or_default(), currency),
            is_active: new.is_active,
            created_at: Utc::now(),
            version: 0,
        };

        let opened = BankingEvent::AccountOpened(AccountOpened {
            account_id: record.id,
            iban: record.iban.clone(),
            opening_balance: record.balance,
            is_active: record.is_active,
            occurred_at: record.created_at,
        });

        Ok(Self {
            record,
            ledger_links: Vec::new(),
            events: vec![opened],
        })
    }

    /// Rehydrate a persisted account (no validation, no events).
    pub fn restore(record: AccountRecord) -> Self {
        Self {
            record,
            ledger_links: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn to_record(&self) -> AccountRecord {
        self.record.clone()
    }

    /// Apply a movement and return the resulting balance.
    ///
    /// Does not check sufficiency; callers validate first. A result outside
    /// the supported range is an error and leaves the account untouched.
    pub fn update_balance(
        &mut self,
        amount: Decimal,
        direction: BalanceDirection,
    ) -> DomainResult<Money> {
        let balance = match direction {
            BalanceDirection::Credit => self.record.balance.plus(amount)?,
            BalanceDirection::Debit => self.record.balance.minus(amount)?,
        };
        self.record.balance = balance;
        self.record.allowed_balance_to_use = balance;
        Ok(balance)
    }

    pub fn activate(&mut self) {
        if !self.record.is_active {
            self.record.is_active = true;
            self.events.push(BankingEvent::AccountActivated(self.status_changed()));
        }
    }

    pub fn deactivate(&mut self) {
        if self.record.is_active {
            self.record.is_active = false;
            self.events.push(BankingEvent::AccountDeactivated(self.status_changed()));
        }
    }

    /// Link this account to `entry`. The role comes from the entry's from/to.
    pub fn add_ledger_reference(&mut self, entry: &CashTransaction) -> DomainResult<AccountLedgerLink> {
        let role = entry.involves(&self.record.iban).ok_or_else(|| {
            DomainError::invariant(format!(
                "account {} does not take part in ledger entry {}",
                self.record.iban,
                entry.entry_id()
            ))
        })?;

        let link = AccountLedgerLink::new(self.record.id, entry.entry_id(), role);
        if !self.ledger_links.iter().any(|l| l.key() == link.key()) {
            self.ledger_links.push(link);
        }
        Ok(link)
    }

    /// Links added since load (not yet persisted).
    pub fn ledger_references(&self) -> &[AccountLedgerLink] {
        &self.ledger_links
    }

    pub fn take_ledger_links(&mut self) -> Vec<AccountLedgerLink> {
        std::mem::take(&mut self.ledger_links)
    }

    /// Whether `required` can be debited right now.
    pub fn can_cover(&self, required: Decimal) -> bool {
        self.record.allowed_balance_to_use.amount() >= required
    }

    fn status_changed(&self) -> AccountStatusChanged {
        AccountStatusChanged {
            account_id: self.record.id,
            iban: self.record.iban.clone(),
            occurred_at: Utc::now(),
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.record.id
    }

    pub fn account_number(&self) -> &str {
        &self.record.account_number
    }

    pub fn iban(&self) -> &Iban {
        &self.record.iban
    }

    pub fn account_type(&self) -> AccountType {
        self.record.account_type
    }

    pub fn branch_id(&self) -> BranchId {
        self.record.branch_id
    }

    pub fn currency(&self) -> Currency {
        self.record.currency
    }

    pub fn holder_name(&self) -> &str {
        &self.record.holder_name
    }

    pub fn balance(&self) -> Money {
        self.record.balance
    }

    pub fn allowed_balance_to_use(&self) -> Money {
        self.record.allowed_balance_to_use
    }

    pub fn minimum_allowed_balance(&self) -> Money {
        self.record.minimum_allowed_balance
    }

    pub fn debt(&self) -> Money {
        self.record.debt
    }

    pub fn is_active(&self) -> bool {
        self.record.is_active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }
}

impl AggregateRoot for BankAccount {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.record.id
    }

    fn version(&self) -> u64 {
        self.record.version
    }
}

impl EventRecorder for BankAccount {
    type Event = BankingEvent;

    fn pending_events(&self) -> &[Self::Event] {
        &self.events
    }

    fn take_events(&mut self) -> Vec<Self::Event> {
        std::mem::take(&mut self.events)
    }
}
