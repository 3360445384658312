use serde::{Deserialize, Serialize};

use tradepost_core::{DomainError, DomainResult, ProductId, UserId};

/// Unique key of a cart row: the same product from two different sellers is
/// two distinct cart entries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CartKey {
    pub buyer_id: UserId,
    pub product_id: ProductId,
    pub seller_id: UserId,
}

/// One cart row.
///
/// # Invariants
/// - `quantity` is always positive; a row that would drop to zero or below
///   is removed instead (see [`QuantityUpdate`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartEntry {
    key: CartKey,
    quantity: i64,
}

impl CartEntry {
    pub fn new(key: CartKey, quantity: i64) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(Self { key, quantity })
    }

    pub fn key(&self) -> CartKey {
        self.key
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    /// Add-to-cart against an existing row merges quantities rather than
    /// replacing them. Returns the resulting quantity.
    pub fn merge_add(&mut self, quantity: i64) -> DomainResult<i64> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        self.quantity = self
            .quantity
            .checked_add(quantity)
            .ok_or_else(|| DomainError::invariant("quantity overflow"))?;
        Ok(self.quantity)
    }
}

/// How an explicit quantity update is applied to a cart row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QuantityUpdate {
    /// Set the row to this exact (positive) quantity.
    Set(i64),
    /// Remove the row; requested quantity was zero or negative.
    Remove,
}

impl QuantityUpdate {
    pub fn from_requested(quantity: i64) -> Self {
        if quantity <= 0 {
            QuantityUpdate::Remove
        } else {
            QuantityUpdate::Set(quantity)
        }
    }
}
