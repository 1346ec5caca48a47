//! Fee computation for transfers.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use ledgerbank_core::{DomainError, DomainResult, round_money};

/// Percentage fee charged to the sender of a transfer.
///
/// The fee is rounded to two places once, here; the amount is never
/// pre-rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    rate: Decimal,
}

impl FeePolicy {
    pub const STANDARD_RATE: Decimal = dec!(0.025);

    pub fn standard() -> Self {
        Self {
            rate: Self::STANDARD_RATE,
        }
    }

    pub fn new(rate: Decimal) -> DomainResult<Self> {
        if rate < Decimal::ZERO || rate >= Decimal::ONE {
            return Err(DomainError::validation(format!(
                "fee rate must be in [0, 1), got {rate}"
            )));
        }
        Ok(Self { rate })
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }

    pub fn fee_for(&self, amount: Decimal) -> DomainResult<Decimal> {
        amount
            .checked_mul(self.rate)
            .map(round_money)
            .ok_or_else(|| DomainError::validation(format!("fee for {amount} overflows")))
    }

    /// `amount + fee_for(amount)`: what the sender must be able to cover.
    pub fn total_debit(&self, amount: Decimal) -> DomainResult<Decimal> {
        amount
            .checked_add(self.fee_for(amount)?)
            .map(round_money)
            .ok_or_else(|| DomainError::validation(format!("total debit for {amount} overflows")))
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::standard()
    }
}
