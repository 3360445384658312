//! The marketplace storage trait: the operation surface consumed by outer
//! layers (HTTP handlers, CLIs) and exercised by the tests.

use async_trait::async_trait;

use tradepost_accounts::{Account, ProfileUpdate, Registration};
use tradepost_cart::{CartKey, PricedCartLine, WishlistEntry};
use tradepost_catalog::{Offer, Product, ProductDraft};
use tradepost_checkout::{CheckoutOutcome, Purchase, ShippingAddress};
use tradepost_core::{Money, ProductId, PurchaseId, UserId};

use crate::error::StoreResult;

/// Atomic marketplace storage.
///
/// ## Atomicity contract
///
/// Every method is a single atomic unit: either all of its effects are
/// visible afterwards or none are. `create_purchase` in particular must not
/// allow two concurrent checkouts to double-spend one balance: the Postgres
/// backend runs it serializably with a bounded retry, the in-memory backend
/// applies it under one state lock.
///
/// ## Outcomes vs errors
///
/// Business refusals (`CheckoutOutcome::InsufficientBalance`, a `false` from
/// a fulfillment toggle) are ordinary values. `StoreError` is reserved for
/// domain validation failures and infrastructure trouble.
#[async_trait]
pub trait MarketStore: Send + Sync {
    // ── accounts ────────────────────────────────────────────────────────

    /// Create an account with a hashed password and zero balance. A taken
    /// email surfaces as `StoreError::Conflict`.
    async fn register_account(
        &self,
        registration: Registration,
        password: &str,
    ) -> StoreResult<Account>;

    /// Look up by email and verify the password. `Ok(None)` for an unknown
    /// email or a mismatch; callers cannot tell the two apart.
    async fn authenticate(&self, email: &str, password: &str) -> StoreResult<Option<Account>>;

    async fn account(&self, id: UserId) -> StoreResult<Account>;

    /// Apply a profile update, optionally rotating the password. Email
    /// uniqueness is re-checked against other accounts.
    async fn update_profile(
        &self,
        id: UserId,
        update: ProfileUpdate,
        new_password: Option<&str>,
    ) -> StoreResult<Account>;

    /// Add funds; returns the new balance.
    async fn top_up(&self, id: UserId, amount: Money) -> StoreResult<Money>;

    /// Remove funds; the sufficiency check is atomic with the debit.
    /// Returns the new balance.
    async fn withdraw(&self, id: UserId, amount: Money) -> StoreResult<Money>;

    /// Lifetime spend of a buyer, at the prices recorded on ledger lines.
    async fn total_spending(&self, buyer: UserId) -> StoreResult<Money>;

    /// Lifetime revenue of a seller, at the prices recorded on ledger lines.
    async fn total_sales(&self, seller: UserId) -> StoreResult<Money>;

    // ── catalog ─────────────────────────────────────────────────────────

    async fn create_product(&self, draft: ProductDraft) -> StoreResult<Product>;

    async fn product(&self, id: ProductId) -> StoreResult<Product>;

    async fn products_in_category(&self, category: &str) -> StoreResult<Vec<Product>>;

    /// Create or replace a seller's offer (quantity and price) for a product.
    async fn upsert_offer(
        &self,
        seller_id: UserId,
        product_id: ProductId,
        quantity: i64,
        price: Money,
    ) -> StoreResult<Offer>;

    /// All sellers' offers for a product (the product detail page).
    async fn product_offers(&self, product_id: ProductId) -> StoreResult<Vec<Offer>>;

    /// One seller's whole inventory (the seller inventory page).
    async fn offers_for_seller(&self, seller_id: UserId) -> StoreResult<Vec<Offer>>;

    /// The seller chosen when a caller adds a product without naming one:
    /// in stock, lowest price, ties to the lowest seller id.
    async fn default_seller(&self, product_id: ProductId) -> StoreResult<Option<UserId>>;

    // ── cart ────────────────────────────────────────────────────────────

    /// Upsert a cart row; an existing row merges quantities. Returns the
    /// resulting quantity.
    async fn add_cart_item(&self, key: CartKey, quantity: i64) -> StoreResult<i64>;

    /// Set an exact quantity. Zero or negative removes the row. Returns the
    /// resulting quantity, or `None` when the row was removed or absent.
    async fn update_cart_item(&self, key: CartKey, quantity: i64) -> StoreResult<Option<i64>>;

    /// Returns whether a row was actually deleted.
    async fn remove_cart_item(&self, key: CartKey) -> StoreResult<bool>;

    /// The buyer's cart joined with catalog data and priced.
    async fn cart_items(&self, buyer_id: UserId) -> StoreResult<Vec<PricedCartLine>>;

    async fn cart_total(&self, buyer_id: UserId) -> StoreResult<Money>;

    /// Sum of quantities (not of rows).
    async fn cart_item_count(&self, buyer_id: UserId) -> StoreResult<i64>;

    // ── wishlist ────────────────────────────────────────────────────────

    /// Idempotent; returns whether a new entry was created.
    async fn add_to_wishlist(
        &self,
        account_id: UserId,
        product_id: ProductId,
    ) -> StoreResult<bool>;

    async fn wishlist(&self, account_id: UserId) -> StoreResult<Vec<WishlistEntry>>;

    // ── checkout & purchases ────────────────────────────────────────────

    /// The checkout engine. Atomically: price the cart, check the balance,
    /// decrement stock, insert the purchase and its ledger lines, debit the
    /// buyer, credit each seller, clear the cart.
    async fn create_purchase(
        &self,
        buyer_id: UserId,
        address: ShippingAddress,
    ) -> StoreResult<CheckoutOutcome>;

    /// Purchase history with embedded lines, newest first.
    async fn purchases_for_buyer(&self, buyer_id: UserId) -> StoreResult<Vec<Purchase>>;

    // ── fulfillment ─────────────────────────────────────────────────────

    /// Flip the caller's ledger line pending→complete and refresh the
    /// purchase-level roll-up in the same atomic unit. Returns whether a
    /// line actually changed.
    async fn mark_fulfilled(
        &self,
        caller: UserId,
        purchase_id: PurchaseId,
        product_id: ProductId,
    ) -> StoreResult<bool>;

    /// The reverse transition, complete→pending.
    async fn mark_unfulfilled(
        &self,
        caller: UserId,
        purchase_id: PurchaseId,
        product_id: ProductId,
    ) -> StoreResult<bool>;
}
