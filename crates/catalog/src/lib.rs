//! `tradepost-catalog` — products and per-seller inventory offers.
//!
//! A [`Product`] is pure catalog identity (name, description, category);
//! price and stock live on the per-seller [`Offer`]. This is the canonical
//! seller-level-price shape: the same product can be sold by several sellers
//! at different prices.

pub mod offer;
pub mod product;

pub use offer::{Offer, default_seller};
pub use product::{Product, ProductDraft};
