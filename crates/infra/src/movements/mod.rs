//! Movement handlers: deposit, withdrawal, transfer and account administration.
//!
//! Every handler follows the same envelope:
//!
//! ```text
//! validate input (no I/O) → begin_atomic → load + mutate + stage
//!   ├─ rejected → rollback → Err(MovementError)
//!   └─ staged   → commit → rows == 0 ? UnknownError
//!                        → publish committed events → Ok(receipt)
//! ```
//!
//! Business rejections are values, never panics. Dropping a handler future
//! before it commits drops the open unit of work, which rolls back.

mod accounts;
mod deposit;
mod transfer;
mod withdrawal;

pub use accounts::{AccountAdministration, AccountReceipt};
pub use deposit::{DepositCommand, DepositHandler};
pub use transfer::{TransferCommand, TransferHandler, TransferKind};
pub use withdrawal::{WithdrawalCommand, WithdrawalHandler};

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, warn};

use ledgerbank_accounts::{BankAccount, CashTransaction, Iban};
use ledgerbank_core::{Currency, DomainError, LedgerEntryId, ValidationErrors, exact_amount};
use ledgerbank_events::{EventBus, EventEnvelope};

use crate::event_channel::DomainEventChannel;
use crate::store::{CommitOutcome, StoreError, TransactionCoordinator, UnitOfWork};

/// Who is performing the movement. Used to stamp display names only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    pub display_name: String,
}

impl Actor {
    pub fn new(username: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementErrorCode {
    NotFound,
    BadRequest,
    InsufficientFunds,
    ValidationError,
    UnauthorizedOperation,
    Conflict,
    UnknownError,
}

impl MovementErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementErrorCode::NotFound => "not_found",
            MovementErrorCode::BadRequest => "bad_request",
            MovementErrorCode::InsufficientFunds => "insufficient_funds",
            MovementErrorCode::ValidationError => "validation_error",
            MovementErrorCode::UnauthorizedOperation => "unauthorized_operation",
            MovementErrorCode::Conflict => "conflict",
            MovementErrorCode::UnknownError => "unknown_error",
        }
    }
}

impl core::fmt::Display for MovementErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failed movement: a stable code plus human-readable messages.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {}", .messages.join("; "))]
pub struct MovementError {
    pub code: MovementErrorCode,
    pub messages: Vec<String>,
}

impl MovementError {
    pub fn new(code: MovementErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            messages: vec![message.into()],
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(MovementErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(MovementErrorCode::BadRequest, message)
    }

    pub fn insufficient_funds(message: impl Into<String>) -> Self {
        Self::new(MovementErrorCode::InsufficientFunds, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(MovementErrorCode::Conflict, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(MovementErrorCode::UnknownError, message)
    }
}

impl From<ValidationErrors> for MovementError {
    fn from(errors: ValidationErrors) -> Self {
        Self {
            code: MovementErrorCode::ValidationError,
            messages: errors.into_violations(),
        }
    }
}

impl From<DomainError> for MovementError {
    fn from(err: DomainError) -> Self {
        let code = match &err {
            DomainError::Validation(_) | DomainError::InvalidId(_) => MovementErrorCode::BadRequest,
            DomainError::NotFound => MovementErrorCode::NotFound,
            DomainError::Conflict(_) => MovementErrorCode::Conflict,
            DomainError::Unauthorized => MovementErrorCode::UnauthorizedOperation,
            DomainError::InvariantViolation(_) => MovementErrorCode::UnknownError,
        };
        Self::new(code, err.message())
    }
}

impl From<StoreError> for MovementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Concurrency(msg) => Self::conflict(msg),
            other => Self::unknown(other.to_string()),
        }
    }
}

/// Successful movement: the completed ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementReceipt {
    pub entry: CashTransaction,
    pub rows_affected: u64,
}

/// Shared begin/commit/publish plumbing for all handlers. Cheap to clone.
#[derive(Debug)]
pub(crate) struct MovementPipeline<C, B> {
    coordinator: Arc<C>,
    channel: DomainEventChannel<B>,
}

impl<C, B: Clone> Clone for MovementPipeline<C, B> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            channel: self.channel.clone(),
        }
    }
}

impl<C, B> MovementPipeline<C, B>
where
    C: TransactionCoordinator,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub(crate) fn new(coordinator: Arc<C>, bus: B) -> Self {
        Self {
            coordinator,
            channel: DomainEventChannel::new(bus),
        }
    }

    pub(crate) async fn begin(&self) -> Result<C::Unit, MovementError> {
        self.coordinator.begin_atomic().await.map_err(|e| {
            error!(error = %e, "could not open unit of work");
            MovementError::from(e)
        })
    }

    /// Roll `unit` back and hand the rejection back to the caller.
    pub(crate) async fn reject(&self, unit: C::Unit, rejection: MovementError) -> MovementError {
        if let Err(e) = unit.rollback().await {
            error!(error = %e, "rollback failed");
        }
        match rejection.code {
            MovementErrorCode::UnknownError => {
                error!(error = %rejection, "movement failed; rolled back")
            }
            _ => warn!(error = %rejection, "movement rejected"),
        }
        rejection
    }

    /// Commit `unit` if staging succeeded, otherwise roll it back.
    pub(crate) async fn finish<T>(
        &self,
        unit: C::Unit,
        staged: Result<T, MovementError>,
    ) -> Result<(T, CommitOutcome), MovementError> {
        let value = match staged {
            Ok(value) => value,
            Err(rejection) => return Err(self.reject(unit, rejection).await),
        };

        let outcome = unit.commit().await.map_err(|e| {
            error!(error = %e, "commit failed; rolled back");
            MovementError::from(e)
        })?;
        if outcome.rows_affected == 0 {
            error!("commit affected no rows");
            return Err(MovementError::unknown("the movement could not be persisted"));
        }

        self.channel.publish(&outcome.messages);
        Ok((value, outcome))
    }
}

/// Parse caller input; failures are `BadRequest`.
pub(crate) fn parse_iban(raw: &str, role: &str) -> Result<Iban, MovementError> {
    Iban::parse(raw).map_err(|e| MovementError::bad_request(format!("{role} {}", e.message())))
}

pub(crate) fn parse_currency(raw: &str) -> Result<Currency, MovementError> {
    raw.parse::<Currency>()
        .map_err(|e| MovementError::bad_request(e.message()))
}

/// The one place a caller's amount is checked. Everything downstream (fee,
/// both balance legs, the entry) uses the returned value unchanged.
pub(crate) fn parse_amount(raw: Decimal) -> Result<Decimal, MovementError> {
    if raw <= Decimal::ZERO {
        return Err(MovementError::bad_request("amount must be greater than zero"));
    }
    exact_amount(raw).map_err(|e| MovementError::bad_request(e.message()))
}

/// Load an account inside `unit`; missing is `NotFound`, inactive is `BadRequest`.
pub(crate) async fn load_active<U: UnitOfWork>(
    unit: &mut U,
    iban: &Iban,
    role: &str,
) -> Result<BankAccount, MovementError> {
    let account = unit
        .load_account(iban)
        .await?
        .ok_or_else(|| MovementError::not_found(format!("{role} account {iban} was not found")))?;
    if !account.is_active() {
        return Err(MovementError::bad_request(format!(
            "{role} account {iban} is not active"
        )));
    }
    Ok(account)
}

/// Movements never convert currencies.
pub(crate) fn ensure_currency(
    account: &BankAccount,
    currency: Currency,
) -> Result<(), MovementError> {
    if account.currency() != currency {
        return Err(MovementError::bad_request(format!(
            "account {} holds {}, movement is in {currency}",
            account.iban(),
            account.currency()
        )));
    }
    Ok(())
}

/// The committed copy of the staged entry.
pub(crate) fn committed_entry(
    outcome: CommitOutcome,
    entry_id: LedgerEntryId,
) -> Result<MovementReceipt, MovementError> {
    let entry = outcome
        .entry(entry_id)
        .cloned()
        .ok_or_else(|| MovementError::unknown("committed ledger entry is missing"))?;
    Ok(MovementReceipt {
        entry,
        rows_affected: outcome.rows_affected,
    })
}
