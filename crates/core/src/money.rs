//! Monetary amounts in smallest currency unit (cents).
//!
//! All money in the marketplace is a non-negative number of cents. Floating
//! point never touches balances or prices; arithmetic is checked and any
//! operation that would overflow or go below zero fails with a
//! [`DomainError`] instead of wrapping.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// A non-negative amount of money in cents.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Construct from a cent amount. Negative amounts are rejected.
    pub fn from_cents(cents: i64) -> DomainResult<Self> {
        if cents < 0 {
            return Err(DomainError::validation("amount cannot be negative"));
        }
        Ok(Self(cents))
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition. Overflow is an invariant violation.
    pub fn checked_add(self, rhs: Money) -> DomainResult<Money> {
        self.0
            .checked_add(rhs.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("amount overflow"))
    }

    /// Checked subtraction. A result below zero is an invariant violation.
    pub fn checked_sub(self, rhs: Money) -> DomainResult<Money> {
        let result = self
            .0
            .checked_sub(rhs.0)
            .ok_or_else(|| DomainError::invariant("amount overflow"))?;
        if result < 0 {
            return Err(DomainError::invariant("amount cannot go negative"));
        }
        Ok(Money(result))
    }

    /// Multiply a unit price by a (non-negative) quantity.
    pub fn checked_mul(self, quantity: i64) -> DomainResult<Money> {
        if quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        self.0
            .checked_mul(quantity)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("amount overflow"))
    }

    /// Sum an iterator of amounts with overflow checking.
    pub fn sum(amounts: impl IntoIterator<Item = Money>) -> DomainResult<Money> {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }
}

impl ValueObject for Money {}

impl core::fmt::Display for Money {
    /// Renders as a decimal amount, e.g. `70.00` for 7000 cents.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}
