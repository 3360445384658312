use serde::{Deserialize, Serialize};

use tradepost_core::{Money, ProductId, UserId};

use crate::purchase::Purchase;

/// Result of a checkout attempt.
///
/// Business-rule refusals are values, not errors: the caller maps them to
/// user-facing messages. Storage and integrity failures are real errors and
/// travel separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutOutcome {
    /// The cart became this purchase; balances moved, stock decremented,
    /// cart cleared.
    Completed(Purchase),
    /// The buyer's cart had no entries. No side effects.
    EmptyCart,
    /// The buyer cannot cover the grand total. No side effects.
    InsufficientBalance { required: Money, available: Money },
    /// An offer cannot cover a requested quantity. No side effects.
    InsufficientStock {
        product_id: ProductId,
        seller_id: UserId,
        requested: i64,
        available: i64,
    },
}

impl CheckoutOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CheckoutOutcome::Completed(_))
    }

    /// The purchase, if the checkout went through.
    pub fn purchase(&self) -> Option<&Purchase> {
        match self {
            CheckoutOutcome::Completed(p) => Some(p),
            _ => None,
        }
    }
}
