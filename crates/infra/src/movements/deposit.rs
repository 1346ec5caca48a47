use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use ledgerbank_accounts::{
    BalanceDirection, CashTransaction, Channel, Iban, MovementType, NewCashTransaction,
    PaymentCategory,
};
use ledgerbank_core::{Currency, LedgerEntryId};
use ledgerbank_events::{EventBus, EventEnvelope};

use crate::store::{TransactionCoordinator, UnitOfWork};

use super::{
    Actor, MovementError, MovementPipeline, MovementReceipt, committed_entry, ensure_currency,
    load_active, parse_amount, parse_currency, parse_iban,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositCommand {
    pub iban: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub description: String,
    pub channel: Channel,
    #[serde(default)]
    pub payment_category: PaymentCategory,
}

/// Credits an account and journals the deposit.
#[derive(Debug)]
pub struct DepositHandler<C, B> {
    pipeline: MovementPipeline<C, B>,
}

impl<C, B> DepositHandler<C, B>
where
    C: TransactionCoordinator,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(coordinator: Arc<C>, bus: B) -> Self {
        Self {
            pipeline: MovementPipeline::new(coordinator, bus),
        }
    }

    #[instrument(
        skip(self, command, actor),
        fields(iban = %command.iban, amount = %command.amount, actor = %actor.username),
        err
    )]
    pub async fn handle(
        &self,
        command: DepositCommand,
        actor: &Actor,
    ) -> Result<MovementReceipt, MovementError> {
        let amount = parse_amount(command.amount)?;
        let iban = parse_iban(&command.iban, "recipient")?;
        let currency = parse_currency(&command.currency)?;

        let mut unit = self.pipeline.begin().await?;
        let staged = stage(&mut unit, &command, amount, &iban, currency, actor).await;
        let (entry_id, outcome) = self.pipeline.finish(unit, staged).await?;

        let receipt = committed_entry(outcome, entry_id)?;
        info!(
            reference = receipt.entry.reference_number(),
            rows = receipt.rows_affected,
            "deposit committed"
        );
        Ok(receipt)
    }
}

async fn stage<U: UnitOfWork>(
    unit: &mut U,
    command: &DepositCommand,
    amount: Decimal,
    iban: &Iban,
    currency: Currency,
    actor: &Actor,
) -> Result<LedgerEntryId, MovementError> {
    let mut account = load_active(unit, iban, "recipient").await?;
    ensure_currency(&account, currency)?;

    let updated_balance = account.update_balance(amount, BalanceDirection::Credit)?;

    let entry = CashTransaction::create(NewCashTransaction {
        movement_type: MovementType::Deposit,
        channel: command.channel,
        from: None,
        to: Some(iban.clone()),
        amount,
        currency,
        fee: Decimal::ZERO,
        description: command.description.clone(),
        sender_available_balance: None,
        recipient_available_balance: Some(updated_balance),
        payment_category: command.payment_category,
        transaction_date: Utc::now(),
        sender_name: Some(actor.display_name.clone()),
        recipient_name: Some(account.holder_name().to_string()),
        reference_number: None,
    })?;
    account.add_ledger_reference(&entry)?;

    let entry_id = entry.entry_id();
    let changes = unit.changes();
    changes.update_account(account);
    changes.record_entry(entry);
    Ok(entry_id)
}
