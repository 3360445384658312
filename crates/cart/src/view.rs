//! Read-side cart aggregations used for rendering: priced lines, totals and
//! item counts. Not part of the checkout's correctness-critical path; the
//! checkout re-prices inside its own transaction.

use serde::{Deserialize, Serialize};

use tradepost_core::{DomainResult, Money, ProductId, UserId};

/// A cart row joined with its catalog data and priced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedCartLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub seller_id: UserId,
    pub seller_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub line_total: Money,
}

impl PricedCartLine {
    pub fn new(
        product_id: ProductId,
        product_name: String,
        seller_id: UserId,
        seller_name: String,
        quantity: i64,
        unit_price: Money,
    ) -> DomainResult<Self> {
        let line_total = unit_price.checked_mul(quantity)?;
        Ok(Self {
            product_id,
            product_name,
            seller_id,
            seller_name,
            quantity,
            unit_price,
            line_total,
        })
    }
}

/// Sum of line totals across the cart.
pub fn cart_total(lines: &[PricedCartLine]) -> DomainResult<Money> {
    Money::sum(lines.iter().map(|l| l.line_total))
}

/// Total number of items (sum of quantities, not of rows).
pub fn item_count(lines: &[PricedCartLine]) -> i64 {
    lines.iter().map(|l| l.quantity).sum()
}
