//! Value object trait: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. Two value objects with the same values are considered equal.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one.
///
/// - **Value Object**: `Money { amount: 10.00, currency: EUR }`, an IBAN
/// - **Entity**: a ledger entry, a bank account (same id = same thing)
///
/// ```ignore
/// let a = Money::new(dec!(10.004), eur);
/// let b = Money::new(dec!(10.00), eur);
/// assert_eq!(a, b); // both rounded to the same minor unit
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
