//! Funds transfer between two accounts, with the sender paying a fee.
//!
//! Both balance changes, the single ledger entry and its two links commit in
//! one unit of work, or none of them do.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use ledgerbank_accounts::{
    BalanceDirection, CashTransaction, Channel, FeePolicy, Iban, MovementType,
    NewCashTransaction, PaymentCategory,
};
use ledgerbank_core::{Currency, LedgerEntryId};
use ledgerbank_events::{EventBus, EventEnvelope};

use crate::config::LedgerConfig;
use crate::store::{TransactionCoordinator, UnitOfWork};

use super::{
    Actor, MovementError, MovementPipeline, MovementReceipt, committed_entry, ensure_currency,
    load_active, parse_amount, parse_currency, parse_iban,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    #[default]
    Standard,
    /// Instant payment. Same fee and rules, journaled as `Fast`.
    Fast,
}

impl TransferKind {
    fn movement_type(self) -> MovementType {
        match self {
            TransferKind::Standard => MovementType::Transfer,
            TransferKind::Fast => MovementType::Fast,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCommand {
    pub from_iban: String,
    pub to_iban: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub description: String,
    pub channel: Channel,
    #[serde(default)]
    pub payment_category: PaymentCategory,
    #[serde(default)]
    pub kind: TransferKind,
    /// Overrides the recipient account's holder name on the entry.
    #[serde(default)]
    pub recipient_name: Option<String>,
}

#[derive(Debug)]
pub struct TransferHandler<C, B> {
    pipeline: MovementPipeline<C, B>,
    fees: FeePolicy,
}

impl<C, B> TransferHandler<C, B>
where
    C: TransactionCoordinator,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(coordinator: Arc<C>, bus: B, fees: FeePolicy) -> Self {
        Self {
            pipeline: MovementPipeline::new(coordinator, bus),
            fees,
        }
    }

    /// Charges the rate configured by `LEDGER_TRANSFER_FEE_RATE`.
    ///
    /// ```ignore
    /// let config = LedgerConfig::from_env()?;
    /// let transfers = TransferHandler::from_config(Arc::new(store), bus, &config);
    /// ```
    pub fn from_config(coordinator: Arc<C>, bus: B, config: &LedgerConfig) -> Self {
        Self::new(coordinator, bus, config.fee_policy)
    }

    /// Same-account and non-positive requests are rejected before any I/O.
    #[instrument(
        skip(self, command, actor),
        fields(
            from = %command.from_iban,
            to = %command.to_iban,
            amount = %command.amount,
            kind = ?command.kind,
            actor = %actor.username
        ),
        err
    )]
    pub async fn handle(
        &self,
        command: TransferCommand,
        actor: &Actor,
    ) -> Result<MovementReceipt, MovementError> {
        let from = parse_iban(&command.from_iban, "sender")?;
        let to = parse_iban(&command.to_iban, "recipient")?;
        if from == to {
            return Err(MovementError::bad_request(
                "sender and recipient accounts must differ",
            ));
        }
        let amount = parse_amount(command.amount)?;
        let currency = parse_currency(&command.currency)?;

        let legs = Legs {
            from: &from,
            to: &to,
            amount,
            currency,
        };
        let mut unit = self.pipeline.begin().await?;
        let staged = stage(&mut unit, &command, legs, self.fees, actor).await;
        let (entry_id, outcome) = self.pipeline.finish(unit, staged).await?;

        let receipt = committed_entry(outcome, entry_id)?;
        info!(
            reference = receipt.entry.reference_number(),
            fee = %receipt.entry.fee().amount(),
            rows = receipt.rows_affected,
            "transfer committed"
        );
        Ok(receipt)
    }
}

#[derive(Clone, Copy)]
struct Legs<'a> {
    from: &'a Iban,
    to: &'a Iban,
    amount: Decimal,
    currency: Currency,
}

async fn stage<U: UnitOfWork>(
    unit: &mut U,
    command: &TransferCommand,
    legs: Legs<'_>,
    fees: FeePolicy,
    actor: &Actor,
) -> Result<LedgerEntryId, MovementError> {
    let mut sender = load_active(unit, legs.from, "sender").await?;
    let mut recipient = load_active(unit, legs.to, "recipient").await?;
    ensure_currency(&sender, legs.currency)?;
    ensure_currency(&recipient, legs.currency)?;

    let fee = fees.fee_for(legs.amount)?;
    let total = fees.total_debit(legs.amount)?;
    if !sender.can_cover(total) {
        return Err(MovementError::insufficient_funds(format!(
            "account {} cannot cover {total} {} (amount {} + fee {fee})",
            legs.from, legs.currency, legs.amount
        )));
    }

    let sender_balance = sender.update_balance(total, BalanceDirection::Debit)?;
    let recipient_balance = recipient.update_balance(legs.amount, BalanceDirection::Credit)?;

    let recipient_name = command
        .recipient_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| recipient.holder_name().to_string());

    let entry = CashTransaction::create(NewCashTransaction {
        movement_type: command.kind.movement_type(),
        channel: command.channel,
        from: Some(legs.from.clone()),
        to: Some(legs.to.clone()),
        amount: legs.amount,
        currency: legs.currency,
        fee,
        description: command.description.clone(),
        sender_available_balance: Some(sender_balance),
        recipient_available_balance: Some(recipient_balance),
        payment_category: command.payment_category,
        transaction_date: Utc::now(),
        sender_name: Some(actor.display_name.clone()),
        recipient_name: Some(recipient_name),
        reference_number: None,
    })?;
    sender.add_ledger_reference(&entry)?;
    recipient.add_ledger_reference(&entry)?;

    let entry_id = entry.entry_id();
    let changes = unit.changes();
    changes.update_account(sender);
    changes.update_account(recipient);
    changes.record_entry(entry);
    Ok(entry_id)
}
