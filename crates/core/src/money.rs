//! Monetary amounts.
//!
//! Amounts are `rust_decimal::Decimal` values held at a fixed scale of two
//! decimal places. Rounding uses the banker's strategy (midpoint to even) and
//! happens when a `Money` is built, so persisted and compared values are always
//! already rounded.

use core::cmp::Ordering;
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Number of minor-unit digits kept for every amount.
pub const MONEY_SCALE: u32 = 2;

/// Largest magnitude a stored amount or balance may take (`NUMERIC(19, 2)`).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0x89E7_FFFF, 0x8AC7_2304, 0, false, 2);

/// Round a raw decimal to the money scale.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp(MONEY_SCALE);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Accept a caller-supplied amount only if it is already representable at the
/// money scale and within [`MAX_AMOUNT`]. Returns it rescaled to two places.
pub fn exact_amount(raw: Decimal) -> DomainResult<Decimal> {
    if raw.normalize().scale() > MONEY_SCALE {
        return Err(DomainError::validation(format!(
            "amount {raw} has more than {MONEY_SCALE} decimal places"
        )));
    }
    ensure_in_range(raw)?;
    Ok(round_money(raw))
}

fn ensure_in_range(amount: Decimal) -> DomainResult<()> {
    if amount.abs() > MAX_AMOUNT {
        return Err(DomainError::validation(format!(
            "amount {amount} is outside the supported range"
        )));
    }
    Ok(())
}

/// Three-letter currency code (e.g. `EUR`, `TRY`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub fn as_str(&self) -> &str {
        // Construction only admits ASCII uppercase letters.
        core::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "currency must be a three-letter code, got '{code}'"
            )));
        }
        let mut bytes = [0u8; 3];
        for (slot, b) in bytes.iter_mut().zip(code.bytes()) {
            *slot = b.to_ascii_uppercase();
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ValueObject for Currency {}

/// An amount paired with its currency.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    /// Build a money value, rounding `amount` to the money scale.
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self {
            amount: round_money(amount),
            currency,
        }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// Same currency, amount sign flipped.
    pub fn negated(&self) -> Self {
        Self::new(-self.amount, self.currency)
    }

    /// Add a raw amount expressed in this currency. Fails instead of
    /// leaving [`MAX_AMOUNT`] or overflowing.
    pub fn plus(&self, amount: Decimal) -> DomainResult<Self> {
        let sum = self
            .amount
            .checked_add(amount)
            .ok_or_else(|| DomainError::validation("amount overflow"))?;
        self.bounded(sum)
    }

    /// Subtract a raw amount expressed in this currency.
    pub fn minus(&self, amount: Decimal) -> DomainResult<Self> {
        let difference = self
            .amount
            .checked_sub(amount)
            .ok_or_else(|| DomainError::validation("amount overflow"))?;
        self.bounded(difference)
    }

    pub fn checked_add(&self, other: &Money) -> DomainResult<Money> {
        self.ensure_same_currency(other)?;
        self.plus(other.amount)
    }

    pub fn checked_sub(&self, other: &Money) -> DomainResult<Money> {
        self.ensure_same_currency(other)?;
        self.minus(other.amount)
    }

    fn bounded(&self, amount: Decimal) -> DomainResult<Self> {
        let rounded = round_money(amount);
        ensure_in_range(rounded)?;
        Ok(Self::new(rounded, self.currency))
    }

    fn ensure_same_currency(&self, other: &Money) -> DomainResult<()> {
        if self.currency != other.currency {
            return Err(DomainError::invariant(format!(
                "currency mismatch: {} vs {}",
                self.currency, other.currency
            )));
        }
        Ok(())
    }
}

/// Amounts in different currencies are not comparable.
impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.currency != other.currency {
            return None;
        }
        self.amount.partial_cmp(&other.amount)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

impl ValueObject for Money {}
