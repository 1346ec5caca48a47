//! Ledger domain: accounts, ledger entries and the links between them.
//!
//! Pure domain logic only: no IO, no persistence concerns. Balance changes
//! happen on [`BankAccount`]; every movement is journaled as a
//! [`CashTransaction`].

/// Snake-case string conversions for fieldless enums stored as text.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub mod account;
pub mod cash_transaction;
pub mod events;
pub mod iban;
pub mod link;
pub mod policy;
pub mod view;

pub use account::{AccountRecord, AccountType, BalanceDirection, BankAccount, NewAccount};
pub use cash_transaction::{
    CashTransaction, CashTransactionRecord, Channel, MovementType, NewCashTransaction,
    PaymentCategory, TransactionStatus,
};
pub use events::{
    ACCOUNT_AGGREGATE, AccountOpened, AccountStatusChanged, BankingEvent, LEDGER_ENTRY_AGGREGATE,
    LedgerEntryCreated,
};
pub use iban::Iban;
pub use link::{AccountLedgerLink, LinkRole};
pub use policy::FeePolicy;
pub use view::LedgerEntryView;
