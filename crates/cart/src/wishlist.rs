use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradepost_core::{ProductId, UserId};

/// A saved-for-later product. Unique per (account, product); adding the same
/// product twice is a no-op at the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishlistEntry {
    pub account_id: UserId,
    pub product_id: ProductId,
    pub added_at: DateTime<Utc>,
}

impl WishlistEntry {
    pub fn new(account_id: UserId, product_id: ProductId, added_at: DateTime<Utc>) -> Self {
        Self {
            account_id,
            product_id,
            added_at,
        }
    }
}
