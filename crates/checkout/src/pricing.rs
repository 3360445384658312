//! Pricing a cart against the catalog's per-seller offers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tradepost_cart::CartEntry;
use tradepost_core::{DomainResult, Money, ProductId, UserId};

/// One cart entry resolved to a price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: ProductId,
    pub seller_id: UserId,
    pub quantity: i64,
    pub unit_price: Money,
    pub line_total: Money,
    /// Whether an offer row backed this price. Lines without one price at
    /// zero and have no stock to decrement.
    pub offer_backed: bool,
}

/// A fully priced cart, ready to be turned into a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub grand_total: Money,
    /// Per-seller subtotals; a purchase may span multiple sellers, each of
    /// which is credited independently. BTreeMap keeps credit order
    /// deterministic.
    pub seller_totals: BTreeMap<UserId, Money>,
}

impl PricedCart {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Price every cart entry with the given per-(product, seller) price lookup.
///
/// A missing offer prices the line at zero rather than failing: the cart
/// row is still purchasable, it just carries no charge and no stock
/// movement. Totals use checked arithmetic throughout.
pub fn price_cart(
    entries: &[CartEntry],
    mut offer_price: impl FnMut(ProductId, UserId) -> Option<Money>,
) -> DomainResult<PricedCart> {
    let mut lines = Vec::with_capacity(entries.len());
    let mut grand_total = Money::ZERO;
    let mut seller_totals: BTreeMap<UserId, Money> = BTreeMap::new();

    for entry in entries {
        let key = entry.key();
        let (unit_price, offer_backed) = match offer_price(key.product_id, key.seller_id) {
            Some(price) => (price, true),
            None => (Money::ZERO, false),
        };
        let line_total = unit_price.checked_mul(entry.quantity())?;

        grand_total = grand_total.checked_add(line_total)?;
        let seller_subtotal = seller_totals.entry(key.seller_id).or_insert(Money::ZERO);
        *seller_subtotal = seller_subtotal.checked_add(line_total)?;

        lines.push(PricedLine {
            product_id: key.product_id,
            seller_id: key.seller_id,
            quantity: entry.quantity(),
            unit_price,
            line_total,
            offer_backed,
        });
    }

    Ok(PricedCart {
        lines,
        grand_total,
        seller_totals,
    })
}
