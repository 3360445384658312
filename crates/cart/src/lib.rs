//! `tradepost-cart` — shopping cart model and merge semantics.
//!
//! A cart is a per-buyer mapping of (product, seller) to quantity. The rules
//! here (adds merge, non-positive updates remove) are pure; persistence and
//! uniqueness live in the store.

pub mod entry;
pub mod view;
pub mod wishlist;

pub use entry::{CartEntry, CartKey, QuantityUpdate};
pub use view::PricedCartLine;
pub use wishlist::WishlistEntry;
