use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use ledgerbank_accounts::{AccountRecord, BankAccount, Iban, NewAccount};
use ledgerbank_core::{AccountId, AggregateRoot, EventRecorder};
use ledgerbank_events::{EventBus, EventEnvelope};

use crate::store::{CommitOutcome, TransactionCoordinator, UnitOfWork};

use super::{MovementError, MovementPipeline, parse_iban};

/// Result of an administrative change. `rows_affected` is zero when the
/// request was already satisfied and nothing was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountReceipt {
    pub account: AccountRecord,
    pub rows_affected: u64,
}

/// Opening, activating and deactivating accounts.
///
/// Runs through the same unit of work as the movement handlers so the
/// resulting events land in the outbox.
#[derive(Debug)]
pub struct AccountAdministration<C, B> {
    pipeline: MovementPipeline<C, B>,
}

impl<C, B> AccountAdministration<C, B>
where
    C: TransactionCoordinator,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(coordinator: Arc<C>, bus: B) -> Self {
        Self {
            pipeline: MovementPipeline::new(coordinator, bus),
        }
    }

    #[instrument(skip(self, new), fields(iban = %new.iban), err)]
    pub async fn open(&self, new: NewAccount) -> Result<AccountReceipt, MovementError> {
        let account = BankAccount::open(new)?;
        let account_id = *account.id();

        let mut unit = self.pipeline.begin().await?;
        let staged = match unit.account_exists(account.iban()).await {
            Ok(true) => Err(MovementError::bad_request(format!(
                "an account with iban {} already exists",
                account.iban()
            ))),
            Ok(false) => {
                unit.changes().open_account(account);
                Ok(account_id)
            }
            Err(e) => Err(e.into()),
        };
        let (account_id, outcome) = self.pipeline.finish(unit, staged).await?;

        let receipt = committed_account(outcome, account_id)?;
        info!(account_id = %account_id, "account opened");
        Ok(receipt)
    }

    pub async fn activate(&self, iban: &str) -> Result<AccountReceipt, MovementError> {
        self.set_active(iban, true).await
    }

    pub async fn deactivate(&self, iban: &str) -> Result<AccountReceipt, MovementError> {
        self.set_active(iban, false).await
    }

    #[instrument(skip(self), err)]
    async fn set_active(&self, iban: &str, active: bool) -> Result<AccountReceipt, MovementError> {
        let iban = parse_iban(iban, "account")?;
        let mut unit = self.pipeline.begin().await?;

        let mut account = match load(&mut unit, &iban).await {
            Ok(account) => account,
            Err(e) => return Err(self.pipeline.reject(unit, e).await),
        };

        if active {
            account.activate();
        } else {
            account.deactivate();
        }
        if account.pending_events().is_empty() {
            unit.rollback().await?;
            return Ok(AccountReceipt {
                account: account.to_record(),
                rows_affected: 0,
            });
        }

        let account_id = *account.id();
        unit.changes().update_account(account);
        let (account_id, outcome) = self.pipeline.finish(unit, Ok(account_id)).await?;
        let receipt = committed_account(outcome, account_id)?;
        info!(account_id = %account_id, active, "account status changed");
        Ok(receipt)
    }
}

async fn load<U: UnitOfWork>(unit: &mut U, iban: &Iban) -> Result<BankAccount, MovementError> {
    unit.load_account(iban)
        .await?
        .ok_or_else(|| MovementError::not_found(format!("account {iban} was not found")))
}

fn committed_account(
    outcome: CommitOutcome,
    account_id: AccountId,
) -> Result<AccountReceipt, MovementError> {
    let account = outcome
        .account(account_id)
        .cloned()
        .ok_or_else(|| MovementError::unknown("committed account is missing"))?;
    Ok(AccountReceipt {
        account,
        rows_affected: outcome.rows_affected,
    })
}
