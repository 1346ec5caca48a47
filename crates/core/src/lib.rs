//! `ledgerbank-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{AggregateRoot, EventRecorder, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, ValidationErrors};
pub use id::{AccountId, BranchId, LedgerEntryId};
pub use money::{Currency, MAX_AMOUNT, MONEY_SCALE, Money, exact_amount, round_money};
pub use value_object::ValueObject;
