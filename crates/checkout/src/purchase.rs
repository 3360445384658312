use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradepost_core::{
    DomainError, DomainResult, Entity, Money, ProductId, PurchaseId, UserId, ValueObject,
};

use crate::fulfillment::{self, FulfillmentStatus};
use crate::pricing::PricedCart;

/// Where a purchase ships. Must be non-empty; stored trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShippingAddress(String);

impl ShippingAddress {
    pub fn new(address: impl Into<String>) -> DomainResult<Self> {
        let address = address.into().trim().to_string();
        if address.is_empty() {
            return Err(DomainError::validation("shipping address cannot be empty"));
        }
        Ok(Self(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for ShippingAddress {}

impl core::fmt::Display for ShippingAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One (seller, product) record belonging to a purchase, with independent
/// fulfillment status. The unit price is the price at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub purchase_id: PurchaseId,
    pub seller_id: UserId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
    pub status: FulfillmentStatus,
}

impl LedgerLine {
    pub fn line_total(&self) -> DomainResult<Money> {
        self.unit_price.checked_mul(self.quantity)
    }

    /// Conditional fulfillment transition, guarded by ownership and by the
    /// expected prior status.
    ///
    /// Returns whether the line actually changed: a line already in the
    /// target state is reported as unchanged, not as an error. A caller who
    /// is not the owning seller gets `Unauthorized`.
    pub fn transition(
        &mut self,
        caller: UserId,
        expected: FulfillmentStatus,
        target: FulfillmentStatus,
    ) -> DomainResult<bool> {
        if caller != self.seller_id {
            return Err(DomainError::Unauthorized);
        }
        if self.status != expected {
            return Ok(false);
        }
        self.status = target;
        Ok(true)
    }

    pub fn mark_fulfilled(&mut self, caller: UserId) -> DomainResult<bool> {
        self.transition(caller, FulfillmentStatus::Pending, FulfillmentStatus::Complete)
    }

    pub fn mark_unfulfilled(&mut self, caller: UserId) -> DomainResult<bool> {
        self.transition(caller, FulfillmentStatus::Complete, FulfillmentStatus::Pending)
    }
}

/// A completed checkout: header plus embedded ledger lines.
///
/// Created exactly once per successful checkout and immutable afterwards,
/// except for `status`, which is always the roll-up of the line statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    id: PurchaseId,
    buyer_id: UserId,
    address: ShippingAddress,
    created_at: DateTime<Utc>,
    status: FulfillmentStatus,
    lines: Vec<LedgerLine>,
    total: Money,
}

impl Purchase {
    /// Build the purchase record for a priced, non-empty cart. Every line
    /// starts pending.
    pub fn from_checkout(
        id: PurchaseId,
        buyer_id: UserId,
        address: ShippingAddress,
        created_at: DateTime<Utc>,
        priced: &PricedCart,
    ) -> DomainResult<Self> {
        if priced.is_empty() {
            return Err(DomainError::invariant("purchase requires at least one line"));
        }

        let lines = priced
            .lines
            .iter()
            .map(|line| LedgerLine {
                purchase_id: id,
                seller_id: line.seller_id,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                status: FulfillmentStatus::Pending,
            })
            .collect();

        Ok(Self {
            id,
            buyer_id,
            address,
            created_at,
            status: FulfillmentStatus::Pending,
            lines,
            total: priced.grand_total,
        })
    }

    /// Rehydrate from stored rows.
    pub fn from_stored(
        id: PurchaseId,
        buyer_id: UserId,
        address: ShippingAddress,
        created_at: DateTime<Utc>,
        status: FulfillmentStatus,
        lines: Vec<LedgerLine>,
        total: Money,
    ) -> Self {
        Self {
            id,
            buyer_id,
            address,
            created_at,
            status,
            lines,
            total,
        }
    }

    pub fn buyer_id(&self) -> UserId {
        self.buyer_id
    }

    pub fn address(&self) -> &ShippingAddress {
        &self.address
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> FulfillmentStatus {
        self.status
    }

    pub fn lines(&self) -> &[LedgerLine] {
        &self.lines
    }

    pub fn total(&self) -> Money {
        self.total
    }

    /// Recompute the purchase-level status from the line statuses.
    pub fn refresh_status(&mut self) -> FulfillmentStatus {
        self.status = fulfillment::rollup(self.lines.iter().map(|l| l.status));
        self.status
    }

    fn line_mut(&mut self, seller_id: UserId, product_id: ProductId) -> Option<&mut LedgerLine> {
        self.lines
            .iter_mut()
            .find(|l| l.seller_id == seller_id && l.product_id == product_id)
    }

    /// Flip the caller's line for `product_id` to complete and refresh the
    /// roll-up. Returns whether a line actually changed; a line the caller
    /// does not own is simply not found.
    pub fn mark_line_fulfilled(
        &mut self,
        caller: UserId,
        product_id: ProductId,
    ) -> DomainResult<bool> {
        let Some(line) = self.line_mut(caller, product_id) else {
            return Ok(false);
        };
        let changed = line.mark_fulfilled(caller)?;
        if changed {
            self.refresh_status();
        }
        Ok(changed)
    }

    /// The reverse transition, complete back to pending.
    pub fn mark_line_unfulfilled(
        &mut self,
        caller: UserId,
        product_id: ProductId,
    ) -> DomainResult<bool> {
        let Some(line) = self.line_mut(caller, product_id) else {
            return Ok(false);
        };
        let changed = line.mark_unfulfilled(caller)?;
        if changed {
            self.refresh_status();
        }
        Ok(changed)
    }
}

impl Entity for Purchase {
    type Id = PurchaseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
