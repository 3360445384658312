//! In-memory marketplace store.
//!
//! Intended for tests/dev. A single mutex over the whole state makes every
//! operation a critical section; multi-step operations mutate a cloned
//! workspace and swap it in at the end, so a failure midway leaves nothing
//! behind. This is the same all-or-nothing contract the Postgres backend
//! gets from its transactions.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use tradepost_accounts::{Account, ProfileUpdate, Registration, password};
use tradepost_cart::{CartEntry, CartKey, PricedCartLine, QuantityUpdate, WishlistEntry, view};
use tradepost_catalog::{Offer, Product, ProductDraft, default_seller};
use tradepost_checkout::{
    CheckoutOutcome, Purchase, ShippingAddress, price_cart,
};
use tradepost_core::{Entity, Money, ProductId, PurchaseId, UserId};

use crate::error::{StoreError, StoreResult};
use crate::market::MarketStore;

#[derive(Debug, Default, Clone)]
struct MemoryState {
    accounts: BTreeMap<UserId, Account>,
    products: BTreeMap<ProductId, Product>,
    offers: BTreeMap<(ProductId, UserId), Offer>,
    cart: BTreeMap<CartKey, CartEntry>,
    wishlist: BTreeMap<(UserId, ProductId), WishlistEntry>,
    purchases: BTreeMap<PurchaseId, Purchase>,
}

/// In-memory [`MarketStore`] backend.
#[derive(Debug, Default)]
pub struct InMemoryMarketStore {
    state: Mutex<MemoryState>,
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::backend("state lock poisoned"))
    }

    fn toggle_fulfillment(
        &self,
        caller: UserId,
        purchase_id: PurchaseId,
        product_id: ProductId,
        to_fulfilled: bool,
    ) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let Some(purchase) = state.purchases.get_mut(&purchase_id) else {
            return Ok(false);
        };
        let changed = if to_fulfilled {
            purchase.mark_line_fulfilled(caller, product_id)?
        } else {
            purchase.mark_line_unfulfilled(caller, product_id)?
        };
        Ok(changed)
    }
}

#[async_trait]
impl MarketStore for InMemoryMarketStore {
    async fn register_account(
        &self,
        registration: Registration,
        password: &str,
    ) -> StoreResult<Account> {
        let hash = password::hash_password(password)?;
        let account = Account::register(UserId::new(), registration, hash)?;

        let mut state = self.lock()?;
        if state.accounts.values().any(|a| a.email() == account.email()) {
            return Err(StoreError::conflict("email already in use"));
        }
        state.accounts.insert(*account.id(), account.clone());
        Ok(account)
    }

    async fn authenticate(&self, email: &str, password_input: &str) -> StoreResult<Option<Account>> {
        let email = email.trim().to_lowercase();
        let state = self.lock()?;
        let Some(account) = state.accounts.values().find(|a| a.email() == email) else {
            return Ok(None);
        };
        if password::verify_password(account.password_hash(), password_input)? {
            Ok(Some(account.clone()))
        } else {
            Ok(None)
        }
    }

    async fn account(&self, id: UserId) -> StoreResult<Account> {
        let state = self.lock()?;
        state
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(StoreError::not_found)
    }

    async fn update_profile(
        &self,
        id: UserId,
        update: ProfileUpdate,
        new_password: Option<&str>,
    ) -> StoreResult<Account> {
        let new_hash = new_password.map(password::hash_password).transpose()?;

        let mut state = self.lock()?;
        let requested_email = update.email.trim().to_lowercase();
        if state
            .accounts
            .values()
            .any(|a| a.email() == requested_email && a.id() != &id)
        {
            return Err(StoreError::conflict("email already in use"));
        }

        let mut account = state
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(StoreError::not_found)?;
        account.update_profile(update)?;
        if let Some(hash) = new_hash {
            account.set_password_hash(hash)?;
        }
        state.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn top_up(&self, id: UserId, amount: Money) -> StoreResult<Money> {
        let mut state = self.lock()?;
        let mut account = state
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(StoreError::not_found)?;
        let balance = account.top_up(amount)?;
        state.accounts.insert(id, account);
        Ok(balance)
    }

    async fn withdraw(&self, id: UserId, amount: Money) -> StoreResult<Money> {
        let mut state = self.lock()?;
        let mut account = state
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(StoreError::not_found)?;
        let balance = account.withdraw(amount)?;
        state.accounts.insert(id, account);
        Ok(balance)
    }

    async fn total_spending(&self, buyer_id: UserId) -> StoreResult<Money> {
        let state = self.lock()?;
        let mut total = Money::ZERO;
        for purchase in state.purchases.values() {
            if purchase.buyer_id() != buyer_id {
                continue;
            }
            for line in purchase.lines() {
                total = total.checked_add(line.line_total()?)?;
            }
        }
        Ok(total)
    }

    async fn total_sales(&self, seller_id: UserId) -> StoreResult<Money> {
        let state = self.lock()?;
        let mut total = Money::ZERO;
        for purchase in state.purchases.values() {
            for line in purchase.lines() {
                if line.seller_id == seller_id {
                    total = total.checked_add(line.line_total()?)?;
                }
            }
        }
        Ok(total)
    }

    async fn create_product(&self, draft: ProductDraft) -> StoreResult<Product> {
        let product = Product::create(ProductId::new(), draft)?;
        let mut state = self.lock()?;
        state.products.insert(*product.id(), product.clone());
        Ok(product)
    }

    async fn product(&self, id: ProductId) -> StoreResult<Product> {
        let state = self.lock()?;
        state
            .products
            .get(&id)
            .cloned()
            .ok_or_else(StoreError::not_found)
    }

    async fn products_in_category(&self, category: &str) -> StoreResult<Vec<Product>> {
        let state = self.lock()?;
        Ok(state
            .products
            .values()
            .filter(|p| p.category() == category)
            .cloned()
            .collect())
    }

    async fn upsert_offer(
        &self,
        seller_id: UserId,
        product_id: ProductId,
        quantity: i64,
        price: Money,
    ) -> StoreResult<Offer> {
        let offer = Offer::new(seller_id, product_id, quantity, price)?;
        let mut state = self.lock()?;
        if !state.products.contains_key(&product_id) {
            return Err(StoreError::not_found());
        }
        state.offers.insert((product_id, seller_id), offer.clone());
        Ok(offer)
    }

    async fn product_offers(&self, product_id: ProductId) -> StoreResult<Vec<Offer>> {
        let state = self.lock()?;
        Ok(state
            .offers
            .values()
            .filter(|o| o.product_id() == product_id)
            .cloned()
            .collect())
    }

    async fn offers_for_seller(&self, seller_id: UserId) -> StoreResult<Vec<Offer>> {
        let state = self.lock()?;
        Ok(state
            .offers
            .values()
            .filter(|o| o.seller_id() == seller_id)
            .cloned()
            .collect())
    }

    async fn default_seller(&self, product_id: ProductId) -> StoreResult<Option<UserId>> {
        let state = self.lock()?;
        Ok(default_seller(
            state.offers.values().filter(|o| o.product_id() == product_id),
        ))
    }

    async fn add_cart_item(&self, key: CartKey, quantity: i64) -> StoreResult<i64> {
        let mut state = self.lock()?;
        match state.cart.get_mut(&key) {
            Some(entry) => Ok(entry.merge_add(quantity)?),
            None => {
                let entry = CartEntry::new(key, quantity)?;
                let resulting = entry.quantity();
                state.cart.insert(key, entry);
                Ok(resulting)
            }
        }
    }

    async fn update_cart_item(&self, key: CartKey, quantity: i64) -> StoreResult<Option<i64>> {
        let mut state = self.lock()?;
        match QuantityUpdate::from_requested(quantity) {
            QuantityUpdate::Remove => {
                state.cart.remove(&key);
                Ok(None)
            }
            QuantityUpdate::Set(quantity) => {
                if !state.cart.contains_key(&key) {
                    return Ok(None);
                }
                let entry = CartEntry::new(key, quantity)?;
                state.cart.insert(key, entry);
                Ok(Some(quantity))
            }
        }
    }

    async fn remove_cart_item(&self, key: CartKey) -> StoreResult<bool> {
        let mut state = self.lock()?;
        Ok(state.cart.remove(&key).is_some())
    }

    async fn cart_items(&self, buyer_id: UserId) -> StoreResult<Vec<PricedCartLine>> {
        let state = self.lock()?;
        let mut lines = Vec::new();
        for entry in state.cart.values().filter(|e| e.key().buyer_id == buyer_id) {
            let key = entry.key();
            // Join semantics: rows whose product or seller vanished are not
            // rendered. A missing offer renders at price zero, matching what
            // checkout would charge.
            let Some(product) = state.products.get(&key.product_id) else {
                continue;
            };
            let Some(seller) = state.accounts.get(&key.seller_id) else {
                continue;
            };
            let unit_price = state
                .offers
                .get(&(key.product_id, key.seller_id))
                .map(|o| o.price())
                .unwrap_or(Money::ZERO);
            lines.push(PricedCartLine::new(
                key.product_id,
                product.name().to_string(),
                key.seller_id,
                seller.display_name(),
                entry.quantity(),
                unit_price,
            )?);
        }
        Ok(lines)
    }

    async fn cart_total(&self, buyer_id: UserId) -> StoreResult<Money> {
        let lines = self.cart_items(buyer_id).await?;
        Ok(view::cart_total(&lines)?)
    }

    async fn cart_item_count(&self, buyer_id: UserId) -> StoreResult<i64> {
        let state = self.lock()?;
        Ok(state
            .cart
            .values()
            .filter(|e| e.key().buyer_id == buyer_id)
            .map(|e| e.quantity())
            .sum())
    }

    async fn add_to_wishlist(
        &self,
        account_id: UserId,
        product_id: ProductId,
    ) -> StoreResult<bool> {
        let mut state = self.lock()?;
        if state.wishlist.contains_key(&(account_id, product_id)) {
            return Ok(false);
        }
        state.wishlist.insert(
            (account_id, product_id),
            WishlistEntry::new(account_id, product_id, Utc::now()),
        );
        Ok(true)
    }

    async fn wishlist(&self, account_id: UserId) -> StoreResult<Vec<WishlistEntry>> {
        let state = self.lock()?;
        let mut entries: Vec<WishlistEntry> = state
            .wishlist
            .values()
            .filter(|w| w.account_id == account_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        Ok(entries)
    }

    async fn create_purchase(
        &self,
        buyer_id: UserId,
        address: ShippingAddress,
    ) -> StoreResult<CheckoutOutcome> {
        let mut state = self.lock()?;
        // Transaction workspace: mutate a clone, swap it in only on success.
        let mut next = state.clone();

        let entries: Vec<CartEntry> = next
            .cart
            .values()
            .filter(|e| e.key().buyer_id == buyer_id)
            .cloned()
            .collect();
        if entries.is_empty() {
            return Ok(CheckoutOutcome::EmptyCart);
        }

        let priced = price_cart(&entries, |product_id, seller_id| {
            next.offers.get(&(product_id, seller_id)).map(|o| o.price())
        })?;

        let buyer = next
            .accounts
            .get(&buyer_id)
            .ok_or_else(StoreError::not_found)?;
        if !buyer.can_afford(priced.grand_total) {
            return Ok(CheckoutOutcome::InsufficientBalance {
                required: priced.grand_total,
                available: buyer.balance(),
            });
        }

        // Availability check before any mutation.
        for line in priced.lines.iter().filter(|l| l.offer_backed) {
            let offer = next
                .offers
                .get(&(line.product_id, line.seller_id))
                .ok_or_else(|| StoreError::integrity("offer vanished during checkout"))?;
            if offer.quantity() < line.quantity {
                return Ok(CheckoutOutcome::InsufficientStock {
                    product_id: line.product_id,
                    seller_id: line.seller_id,
                    requested: line.quantity,
                    available: offer.quantity(),
                });
            }
        }

        // Every credited seller must still exist.
        for seller_id in priced.seller_totals.keys() {
            if !next.accounts.contains_key(seller_id) {
                return Err(StoreError::integrity(format!(
                    "seller account {seller_id} no longer exists"
                )));
            }
        }

        for line in priced.lines.iter().filter(|l| l.offer_backed) {
            let offer = next
                .offers
                .get_mut(&(line.product_id, line.seller_id))
                .ok_or_else(|| StoreError::integrity("offer vanished during checkout"))?;
            offer.reserve(line.quantity)?;
        }

        let purchase = Purchase::from_checkout(
            PurchaseId::new(),
            buyer_id,
            address,
            Utc::now(),
            &priced,
        )?;

        let buyer = next
            .accounts
            .get_mut(&buyer_id)
            .ok_or_else(StoreError::not_found)?;
        buyer.debit(priced.grand_total)?;
        for (seller_id, subtotal) in &priced.seller_totals {
            let seller = next.accounts.get_mut(seller_id).ok_or_else(|| {
                StoreError::integrity(format!("seller account {seller_id} no longer exists"))
            })?;
            seller.credit(*subtotal)?;
        }

        next.cart.retain(|key, _| key.buyer_id != buyer_id);
        next.purchases.insert(*purchase.id(), purchase.clone());

        *state = next;
        Ok(CheckoutOutcome::Completed(purchase))
    }

    async fn purchases_for_buyer(&self, buyer_id: UserId) -> StoreResult<Vec<Purchase>> {
        let state = self.lock()?;
        let mut purchases: Vec<Purchase> = state
            .purchases
            .values()
            .filter(|p| p.buyer_id() == buyer_id)
            .cloned()
            .collect();
        purchases.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(purchases)
    }

    async fn mark_fulfilled(
        &self,
        caller: UserId,
        purchase_id: PurchaseId,
        product_id: ProductId,
    ) -> StoreResult<bool> {
        self.toggle_fulfillment(caller, purchase_id, product_id, true)
    }

    async fn mark_unfulfilled(
        &self,
        caller: UserId,
        purchase_id: PurchaseId,
        product_id: ProductId,
    ) -> StoreResult<bool> {
        self.toggle_fulfillment(caller, purchase_id, product_id, false)
    }
}
