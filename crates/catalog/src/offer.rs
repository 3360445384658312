use serde::{Deserialize, Serialize};

use tradepost_core::{DomainError, DomainResult, Money, ProductId, UserId};

/// One seller's inventory entry for one product: quantity on hand and the
/// price that seller charges. Unique per (seller, product) pair.
///
/// # Invariants
/// - `quantity` never goes negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    seller_id: UserId,
    product_id: ProductId,
    quantity: i64,
    price: Money,
}

impl Offer {
    pub fn new(
        seller_id: UserId,
        product_id: ProductId,
        quantity: i64,
        price: Money,
    ) -> DomainResult<Self> {
        if quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        Ok(Self {
            seller_id,
            product_id,
            quantity,
            price,
        })
    }

    pub fn seller_id(&self) -> UserId {
        self.seller_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn in_stock(&self) -> bool {
        self.quantity > 0
    }

    pub fn set_price(&mut self, price: Money) {
        self.price = price;
    }

    /// Seller-initiated stock correction by a signed delta.
    pub fn adjust_stock(&mut self, delta: i64) -> DomainResult<i64> {
        if delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }
        let new_quantity = self
            .quantity
            .checked_add(delta)
            .ok_or_else(|| DomainError::invariant("quantity overflow"))?;
        if new_quantity < 0 {
            return Err(DomainError::invariant("stock cannot go negative"));
        }
        self.quantity = new_quantity;
        Ok(self.quantity)
    }

    /// Replace the quantity outright (seller inventory upsert).
    pub fn set_quantity(&mut self, quantity: i64) -> DomainResult<()> {
        if quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        self.quantity = quantity;
        Ok(())
    }

    /// Take stock for a checkout line. The soft availability check happens at
    /// the checkout boundary; this is the hard guard.
    pub fn reserve(&mut self, quantity: i64) -> DomainResult<()> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if quantity > self.quantity {
            return Err(DomainError::invariant("insufficient stock"));
        }
        self.quantity -= quantity;
        Ok(())
    }
}

/// Pick the seller used when a caller adds a product to the cart without
/// naming one.
///
/// Policy (deliberately explicit, not iteration order): among sellers with
/// positive stock, the lowest price wins; ties break to the lowest seller id.
pub fn default_seller<'a>(offers: impl IntoIterator<Item = &'a Offer>) -> Option<UserId> {
    offers
        .into_iter()
        .filter(|o| o.in_stock())
        .min_by_key(|o| (o.price(), o.seller_id()))
        .map(|o| o.seller_id())
}
