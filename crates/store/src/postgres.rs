//! Postgres-backed marketplace store.
//!
//! The checkout runs under a SERIALIZABLE transaction with row locks taken
//! in deterministic order (cart order for offers, sorted ids for accounts)
//! and one retry on serialization failure.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `40001`, `40P01` | `Conflict` | Serialization failure / deadlock (retried once in checkout) |
//! | `23505` | `Conflict` | Unique violation (e.g. concurrent registration of one email) |
//! | `23503` | `Integrity` | Referential integrity violation |
//! | `23514` | `Integrity` | Check constraint violation (negative balance/stock) |
//! | other database errors | `Backend` | Driver, connection, pool failures |
//!
//! ## Thread Safety
//!
//! `PostgresMarketStore` is `Send + Sync`; the SQLx pool handles connection
//! management across threads.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use tradepost_accounts::{Account, ProfileUpdate, Registration, password};
use tradepost_cart::{CartEntry, CartKey, PricedCartLine, QuantityUpdate, WishlistEntry};
use tradepost_catalog::{Offer, Product, ProductDraft};
use tradepost_checkout::{
    CheckoutOutcome, FulfillmentStatus, LedgerLine, Purchase, ShippingAddress, price_cart,
};
use tradepost_core::{Entity, Money, ProductId, PurchaseId, UserId};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::market::MarketStore;

const SCHEMA: &str = include_str!("schema.sql");

/// Postgres [`MarketStore`] backend.
#[derive(Debug, Clone)]
pub struct PostgresMarketStore {
    pool: Arc<PgPool>,
}

impl PostgresMarketStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a connection pool from configuration.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| StoreError::backend(format!("failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Apply the schema (idempotent).
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn account_for_update(
        tx: &mut Transaction<'_, Postgres>,
        id: UserId,
    ) -> StoreResult<Account> {
        let row = sqlx::query(
            r#"
            SELECT id, email, first_name, last_name, address, bio, balance_cents, password_hash
            FROM accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("account_for_update", e))?
        .ok_or_else(StoreError::not_found)?;

        AccountRow::from_row(&row)
            .map_err(|e| StoreError::backend(format!("failed to deserialize account row: {e}")))?
            .into_account()
    }

    async fn write_balance(
        tx: &mut Transaction<'_, Postgres>,
        id: UserId,
        balance: Money,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE accounts SET balance_cents = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(balance.cents())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("write_balance", e))?;
        if result.rows_affected() != 1 {
            return Err(StoreError::integrity(format!(
                "account {id} vanished during balance update"
            )));
        }
        Ok(())
    }

    /// One checkout attempt inside one serializable transaction. The outer
    /// `create_purchase` retries once on a serialization conflict.
    async fn try_create_purchase(
        &self,
        buyer_id: UserId,
        address: &ShippingAddress,
    ) -> StoreResult<CheckoutOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation_level", e))?;

        let cart_rows = sqlx::query(
            r#"
            SELECT product_id, seller_id, quantity
            FROM cart_entries
            WHERE buyer_id = $1
            ORDER BY product_id, seller_id
            "#,
        )
        .bind(buyer_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_cart", e))?;

        if cart_rows.is_empty() {
            return Ok(CheckoutOutcome::EmptyCart);
        }

        let mut entries = Vec::with_capacity(cart_rows.len());
        for row in &cart_rows {
            let product_id: uuid::Uuid = row
                .try_get("product_id")
                .map_err(|e| StoreError::backend(format!("failed to read cart row: {e}")))?;
            let seller_id: uuid::Uuid = row
                .try_get("seller_id")
                .map_err(|e| StoreError::backend(format!("failed to read cart row: {e}")))?;
            let quantity: i64 = row
                .try_get("quantity")
                .map_err(|e| StoreError::backend(format!("failed to read cart row: {e}")))?;
            entries.push(CartEntry::new(
                CartKey {
                    buyer_id,
                    product_id: ProductId::from_uuid(product_id),
                    seller_id: UserId::from_uuid(seller_id),
                },
                quantity,
            )?);
        }

        // Lock every backing offer up front, in cart (key) order.
        let mut offers: HashMap<(ProductId, UserId), (i64, Money)> = HashMap::new();
        for entry in &entries {
            let key = entry.key();
            let row = sqlx::query(
                r#"
                SELECT quantity, price_cents
                FROM offers
                WHERE product_id = $1 AND seller_id = $2
                FOR UPDATE
                "#,
            )
            .bind(key.product_id.as_uuid())
            .bind(key.seller_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_offer", e))?;

            if let Some(row) = row {
                let quantity: i64 = row
                    .try_get("quantity")
                    .map_err(|e| StoreError::backend(format!("failed to read offer row: {e}")))?;
                let price_cents: i64 = row
                    .try_get("price_cents")
                    .map_err(|e| StoreError::backend(format!("failed to read offer row: {e}")))?;
                offers.insert(
                    (key.product_id, key.seller_id),
                    (quantity, Money::from_cents(price_cents)?),
                );
            }
        }

        let priced = price_cart(&entries, |product_id, seller_id| {
            offers.get(&(product_id, seller_id)).map(|(_, price)| *price)
        })?;

        let buyer = Self::account_for_update(&mut tx, buyer_id).await?;
        if !buyer.can_afford(priced.grand_total) {
            return Ok(CheckoutOutcome::InsufficientBalance {
                required: priced.grand_total,
                available: buyer.balance(),
            });
        }

        for line in priced.lines.iter().filter(|l| l.offer_backed) {
            let Some((available, _)) = offers.get(&(line.product_id, line.seller_id)).copied()
            else {
                return Err(StoreError::integrity("offer vanished during checkout"));
            };
            if available < line.quantity {
                return Ok(CheckoutOutcome::InsufficientStock {
                    product_id: line.product_id,
                    seller_id: line.seller_id,
                    requested: line.quantity,
                    available,
                });
            }
        }

        let purchase = Purchase::from_checkout(
            PurchaseId::new(),
            buyer_id,
            address.clone(),
            Utc::now(),
            &priced,
        )?;

        sqlx::query(
            r#"
            INSERT INTO purchases (id, buyer_id, address, created_at, fulfillment_status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(purchase.id().as_uuid())
        .bind(buyer_id.as_uuid())
        .bind(purchase.address().as_str())
        .bind(purchase.created_at())
        .bind(purchase.status().as_i16())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_purchase", e))?;

        for line in purchase.lines() {
            sqlx::query(
                r#"
                INSERT INTO ledger_lines
                    (purchase_id, seller_id, product_id, quantity, unit_price_cents, fulfillment_status)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(line.purchase_id.as_uuid())
            .bind(line.seller_id.as_uuid())
            .bind(line.product_id.as_uuid())
            .bind(line.quantity)
            .bind(line.unit_price.cents())
            .bind(line.status.as_i16())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_ledger_line", e))?;
        }

        for line in priced.lines.iter().filter(|l| l.offer_backed) {
            let result = sqlx::query(
                r#"
                UPDATE offers
                SET quantity = quantity - $3
                WHERE product_id = $1 AND seller_id = $2
                "#,
            )
            .bind(line.product_id.as_uuid())
            .bind(line.seller_id.as_uuid())
            .bind(line.quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("decrement_offer", e))?;
            if result.rows_affected() != 1 {
                return Err(StoreError::integrity("offer vanished during checkout"));
            }
        }

        let new_balance = buyer.balance().checked_sub(priced.grand_total)?;
        Self::write_balance(&mut tx, buyer_id, new_balance).await?;

        // seller_totals is a BTreeMap, so credits lock accounts in id order.
        for (seller_id, subtotal) in &priced.seller_totals {
            let result = sqlx::query(
                "UPDATE accounts SET balance_cents = balance_cents + $2 WHERE id = $1",
            )
            .bind(seller_id.as_uuid())
            .bind(subtotal.cents())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("credit_seller", e))?;
            if result.rows_affected() != 1 {
                return Err(StoreError::integrity(format!(
                    "seller account {seller_id} no longer exists"
                )));
            }
        }

        sqlx::query("DELETE FROM cart_entries WHERE buyer_id = $1")
            .bind(buyer_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_cart", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(CheckoutOutcome::Completed(purchase))
    }

    async fn toggle_fulfillment(
        &self,
        caller: UserId,
        purchase_id: PurchaseId,
        product_id: ProductId,
        expected: FulfillmentStatus,
        target: FulfillmentStatus,
    ) -> StoreResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let result = sqlx::query(
            r#"
            UPDATE ledger_lines
            SET fulfillment_status = $4
            WHERE purchase_id = $1 AND product_id = $2 AND seller_id = $3
              AND fulfillment_status = $5
            "#,
        )
        .bind(purchase_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(caller.as_uuid())
        .bind(target.as_i16())
        .bind(expected.as_i16())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("toggle_ledger_line", e))?;

        let changed = result.rows_affected() > 0;
        if changed {
            // Keep the purchase header in sync with its lines, atomically.
            sqlx::query(
                r#"
                UPDATE purchases
                SET fulfillment_status = (
                    SELECT CASE WHEN BOOL_AND(fulfillment_status = 1) THEN 1 ELSE 0 END
                    FROM ledger_lines
                    WHERE purchase_id = $1
                )
                WHERE id = $1
                "#,
            )
            .bind(purchase_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("rollup_purchase_status", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(changed)
    }
}

#[async_trait]
impl MarketStore for PostgresMarketStore {
    #[instrument(skip(self, registration, password_input), err)]
    async fn register_account(
        &self,
        registration: Registration,
        password_input: &str,
    ) -> StoreResult<Account> {
        let hash = password::hash_password(password_input)?;
        let account = Account::register(UserId::new(), registration, hash)?;

        sqlx::query(
            r#"
            INSERT INTO accounts
                (id, email, first_name, last_name, address, bio, balance_cents, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(account.id().as_uuid())
        .bind(account.email())
        .bind(account.first_name())
        .bind(account.last_name())
        .bind(account.address())
        .bind(account.bio())
        .bind(account.balance().cents())
        .bind(account.password_hash())
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::conflict("email already in use")
            } else {
                map_sqlx_error("register_account", e)
            }
        })?;

        Ok(account)
    }

    async fn authenticate(
        &self,
        email: &str,
        password_input: &str,
    ) -> StoreResult<Option<Account>> {
        let email = email.trim().to_lowercase();
        let row = sqlx::query(
            r#"
            SELECT id, email, first_name, last_name, address, bio, balance_cents, password_hash
            FROM accounts
            WHERE email = $1
            "#,
        )
        .bind(&email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("authenticate", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let account = AccountRow::from_row(&row)
            .map_err(|e| StoreError::backend(format!("failed to deserialize account row: {e}")))?
            .into_account()?;

        if password::verify_password(account.password_hash(), password_input)? {
            Ok(Some(account))
        } else {
            Ok(None)
        }
    }

    async fn account(&self, id: UserId) -> StoreResult<Account> {
        let row = sqlx::query(
            r#"
            SELECT id, email, first_name, last_name, address, bio, balance_cents, password_hash
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("account", e))?
        .ok_or_else(StoreError::not_found)?;

        AccountRow::from_row(&row)
            .map_err(|e| StoreError::backend(format!("failed to deserialize account row: {e}")))?
            .into_account()
    }

    async fn update_profile(
        &self,
        id: UserId,
        update: ProfileUpdate,
        new_password: Option<&str>,
    ) -> StoreResult<Account> {
        let new_hash = new_password.map(password::hash_password).transpose()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let requested_email = update.email.trim().to_lowercase();
        let taken = sqlx::query("SELECT 1 FROM accounts WHERE email = $1 AND id != $2")
            .bind(&requested_email)
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_email", e))?;
        if taken.is_some() {
            return Err(StoreError::conflict("email already in use"));
        }

        let mut account = Self::account_for_update(&mut tx, id).await?;
        account.update_profile(update)?;
        if let Some(hash) = new_hash {
            account.set_password_hash(hash)?;
        }

        sqlx::query(
            r#"
            UPDATE accounts
            SET email = $2, first_name = $3, last_name = $4, address = $5, bio = $6,
                password_hash = $7
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(account.email())
        .bind(account.first_name())
        .bind(account.last_name())
        .bind(account.address())
        .bind(account.bio())
        .bind(account.password_hash())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::conflict("email already in use")
            } else {
                map_sqlx_error("update_profile", e)
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(account)
    }

    async fn top_up(&self, id: UserId, amount: Money) -> StoreResult<Money> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut account = Self::account_for_update(&mut tx, id).await?;
        let balance = account.top_up(amount)?;
        Self::write_balance(&mut tx, id, balance).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(balance)
    }

    async fn withdraw(&self, id: UserId, amount: Money) -> StoreResult<Money> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut account = Self::account_for_update(&mut tx, id).await?;
        let balance = account.withdraw(amount)?;
        Self::write_balance(&mut tx, id, balance).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(balance)
    }

    async fn total_spending(&self, buyer_id: UserId) -> StoreResult<Money> {
        let row = sqlx::query(
            r#"
            SELECT CAST(COALESCE(SUM(l.quantity * l.unit_price_cents), 0) AS BIGINT) AS total
            FROM ledger_lines l
            JOIN purchases p ON p.id = l.purchase_id
            WHERE p.buyer_id = $1
            "#,
        )
        .bind(buyer_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("total_spending", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| StoreError::backend(format!("failed to read total: {e}")))?;
        Ok(Money::from_cents(total)?)
    }

    async fn total_sales(&self, seller_id: UserId) -> StoreResult<Money> {
        let row = sqlx::query(
            r#"
            SELECT CAST(COALESCE(SUM(quantity * unit_price_cents), 0) AS BIGINT) AS total
            FROM ledger_lines
            WHERE seller_id = $1
            "#,
        )
        .bind(seller_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("total_sales", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| StoreError::backend(format!("failed to read total: {e}")))?;
        Ok(Money::from_cents(total)?)
    }

    async fn create_product(&self, draft: ProductDraft) -> StoreResult<Product> {
        let product = Product::create(ProductId::new(), draft)?;
        sqlx::query(
            "INSERT INTO products (id, name, description, category) VALUES ($1, $2, $3, $4)",
        )
        .bind(product.id().as_uuid())
        .bind(product.name())
        .bind(product.description())
        .bind(product.category())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_product", e))?;
        Ok(product)
    }

    async fn product(&self, id: ProductId) -> StoreResult<Product> {
        let row = sqlx::query("SELECT id, name, description, category FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("product", e))?
            .ok_or_else(StoreError::not_found)?;

        Ok(ProductRow::from_row(&row)
            .map_err(|e| StoreError::backend(format!("failed to deserialize product row: {e}")))?
            .into_product())
    }

    async fn products_in_category(&self, category: &str) -> StoreResult<Vec<Product>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, category
            FROM products
            WHERE category = $1
            ORDER BY name, id
            "#,
        )
        .bind(category)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("products_in_category", e))?;

        let mut products = Vec::with_capacity(rows.len());
        for row in rows {
            products.push(
                ProductRow::from_row(&row)
                    .map_err(|e| {
                        StoreError::backend(format!("failed to deserialize product row: {e}"))
                    })?
                    .into_product(),
            );
        }
        Ok(products)
    }

    async fn upsert_offer(
        &self,
        seller_id: UserId,
        product_id: ProductId,
        quantity: i64,
        price: Money,
    ) -> StoreResult<Offer> {
        let offer = Offer::new(seller_id, product_id, quantity, price)?;

        let exists = sqlx::query("SELECT 1 FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("check_product", e))?;
        if exists.is_none() {
            return Err(StoreError::not_found());
        }

        sqlx::query(
            r#"
            INSERT INTO offers (seller_id, product_id, quantity, price_cents)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (seller_id, product_id)
            DO UPDATE SET quantity = EXCLUDED.quantity, price_cents = EXCLUDED.price_cents
            "#,
        )
        .bind(seller_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(offer.quantity())
        .bind(offer.price().cents())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_offer", e))?;

        Ok(offer)
    }

    async fn product_offers(&self, product_id: ProductId) -> StoreResult<Vec<Offer>> {
        let rows = sqlx::query(
            r#"
            SELECT seller_id, product_id, quantity, price_cents
            FROM offers
            WHERE product_id = $1
            ORDER BY price_cents, seller_id
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("product_offers", e))?;

        rows.iter().map(offer_from_row).collect()
    }

    async fn offers_for_seller(&self, seller_id: UserId) -> StoreResult<Vec<Offer>> {
        let rows = sqlx::query(
            r#"
            SELECT seller_id, product_id, quantity, price_cents
            FROM offers
            WHERE seller_id = $1
            ORDER BY product_id
            "#,
        )
        .bind(seller_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("offers_for_seller", e))?;

        rows.iter().map(offer_from_row).collect()
    }

    async fn default_seller(&self, product_id: ProductId) -> StoreResult<Option<UserId>> {
        let row = sqlx::query(
            r#"
            SELECT seller_id
            FROM offers
            WHERE product_id = $1 AND quantity > 0
            ORDER BY price_cents ASC, seller_id ASC
            LIMIT 1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("default_seller", e))?;

        match row {
            Some(row) => {
                let seller_id: uuid::Uuid = row
                    .try_get("seller_id")
                    .map_err(|e| StoreError::backend(format!("failed to read seller_id: {e}")))?;
                Ok(Some(UserId::from_uuid(seller_id)))
            }
            None => Ok(None),
        }
    }

    async fn add_cart_item(&self, key: CartKey, quantity: i64) -> StoreResult<i64> {
        // Shape validation up front; the SQL upsert carries the merge.
        CartEntry::new(key, quantity)?;

        let row = sqlx::query(
            r#"
            INSERT INTO cart_entries (buyer_id, product_id, seller_id, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (buyer_id, product_id, seller_id)
            DO UPDATE SET quantity = cart_entries.quantity + EXCLUDED.quantity
            RETURNING quantity
            "#,
        )
        .bind(key.buyer_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.seller_id.as_uuid())
        .bind(quantity)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_cart_item", e))?;

        row.try_get("quantity")
            .map_err(|e| StoreError::backend(format!("failed to read quantity: {e}")))
    }

    async fn update_cart_item(&self, key: CartKey, quantity: i64) -> StoreResult<Option<i64>> {
        match QuantityUpdate::from_requested(quantity) {
            QuantityUpdate::Remove => {
                self.remove_cart_item(key).await?;
                Ok(None)
            }
            QuantityUpdate::Set(quantity) => {
                let row = sqlx::query(
                    r#"
                    UPDATE cart_entries
                    SET quantity = $4
                    WHERE buyer_id = $1 AND product_id = $2 AND seller_id = $3
                    RETURNING quantity
                    "#,
                )
                .bind(key.buyer_id.as_uuid())
                .bind(key.product_id.as_uuid())
                .bind(key.seller_id.as_uuid())
                .bind(quantity)
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("update_cart_item", e))?;

                match row {
                    Some(row) => Ok(Some(row.try_get("quantity").map_err(|e| {
                        StoreError::backend(format!("failed to read quantity: {e}"))
                    })?)),
                    None => Ok(None),
                }
            }
        }
    }

    async fn remove_cart_item(&self, key: CartKey) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM cart_entries
            WHERE buyer_id = $1 AND product_id = $2 AND seller_id = $3
            "#,
        )
        .bind(key.buyer_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.seller_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("remove_cart_item", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn cart_items(&self, buyer_id: UserId) -> StoreResult<Vec<PricedCartLine>> {
        let rows = sqlx::query(
            r#"
            SELECT c.product_id, c.seller_id, c.quantity,
                   p.name AS product_name,
                   a.first_name, a.last_name,
                   COALESCE(o.price_cents, 0) AS price_cents
            FROM cart_entries c
            JOIN products p ON p.id = c.product_id
            JOIN accounts a ON a.id = c.seller_id
            LEFT JOIN offers o
              ON o.product_id = c.product_id AND o.seller_id = c.seller_id
            WHERE c.buyer_id = $1
            ORDER BY c.product_id, c.seller_id
            "#,
        )
        .bind(buyer_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("cart_items", e))?;

        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let product_id: uuid::Uuid = row
                .try_get("product_id")
                .map_err(|e| StoreError::backend(format!("failed to read cart row: {e}")))?;
            let seller_id: uuid::Uuid = row
                .try_get("seller_id")
                .map_err(|e| StoreError::backend(format!("failed to read cart row: {e}")))?;
            let quantity: i64 = row
                .try_get("quantity")
                .map_err(|e| StoreError::backend(format!("failed to read cart row: {e}")))?;
            let product_name: String = row
                .try_get("product_name")
                .map_err(|e| StoreError::backend(format!("failed to read cart row: {e}")))?;
            let first_name: String = row
                .try_get("first_name")
                .map_err(|e| StoreError::backend(format!("failed to read cart row: {e}")))?;
            let last_name: String = row
                .try_get("last_name")
                .map_err(|e| StoreError::backend(format!("failed to read cart row: {e}")))?;
            let price_cents: i64 = row
                .try_get("price_cents")
                .map_err(|e| StoreError::backend(format!("failed to read cart row: {e}")))?;

            lines.push(PricedCartLine::new(
                ProductId::from_uuid(product_id),
                product_name,
                UserId::from_uuid(seller_id),
                format!("{first_name} {last_name}").trim().to_string(),
                quantity,
                Money::from_cents(price_cents)?,
            )?);
        }
        Ok(lines)
    }

    async fn cart_total(&self, buyer_id: UserId) -> StoreResult<Money> {
        let row = sqlx::query(
            r#"
            SELECT CAST(COALESCE(SUM(c.quantity * COALESCE(o.price_cents, 0)), 0) AS BIGINT)
                AS total
            FROM cart_entries c
            LEFT JOIN offers o
              ON o.product_id = c.product_id AND o.seller_id = c.seller_id
            WHERE c.buyer_id = $1
            "#,
        )
        .bind(buyer_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("cart_total", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| StoreError::backend(format!("failed to read total: {e}")))?;
        Ok(Money::from_cents(total)?)
    }

    async fn cart_item_count(&self, buyer_id: UserId) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT CAST(COALESCE(SUM(quantity), 0) AS BIGINT) AS item_count
            FROM cart_entries
            WHERE buyer_id = $1
            "#,
        )
        .bind(buyer_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("cart_item_count", e))?;

        row.try_get("item_count")
            .map_err(|e| StoreError::backend(format!("failed to read item_count: {e}")))
    }

    async fn add_to_wishlist(
        &self,
        account_id: UserId,
        product_id: ProductId,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO wishlist_entries (account_id, product_id)
            VALUES ($1, $2)
            ON CONFLICT (account_id, product_id) DO NOTHING
            "#,
        )
        .bind(account_id.as_uuid())
        .bind(product_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_to_wishlist", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn wishlist(&self, account_id: UserId) -> StoreResult<Vec<WishlistEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, product_id, added_at
            FROM wishlist_entries
            WHERE account_id = $1
            ORDER BY added_at DESC
            "#,
        )
        .bind(account_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("wishlist", e))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let account_id: uuid::Uuid = row
                .try_get("account_id")
                .map_err(|e| StoreError::backend(format!("failed to read wishlist row: {e}")))?;
            let product_id: uuid::Uuid = row
                .try_get("product_id")
                .map_err(|e| StoreError::backend(format!("failed to read wishlist row: {e}")))?;
            let added_at: DateTime<Utc> = row
                .try_get("added_at")
                .map_err(|e| StoreError::backend(format!("failed to read wishlist row: {e}")))?;
            entries.push(WishlistEntry::new(
                UserId::from_uuid(account_id),
                ProductId::from_uuid(product_id),
                added_at,
            ));
        }
        Ok(entries)
    }

    #[instrument(skip(self, address), fields(buyer_id = %buyer_id), err)]
    async fn create_purchase(
        &self,
        buyer_id: UserId,
        address: ShippingAddress,
    ) -> StoreResult<CheckoutOutcome> {
        // One retry on serialization conflict, then surface it.
        match self.try_create_purchase(buyer_id, &address).await {
            Err(StoreError::Conflict(first)) => {
                tracing::warn!(conflict = %first, "checkout serialization conflict, retrying once");
                self.try_create_purchase(buyer_id, &address).await
            }
            other => other,
        }
    }

    async fn purchases_for_buyer(&self, buyer_id: UserId) -> StoreResult<Vec<Purchase>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.buyer_id, p.address, p.created_at,
                   p.fulfillment_status,
                   l.seller_id, l.product_id, l.quantity, l.unit_price_cents,
                   l.fulfillment_status AS line_status
            FROM purchases p
            JOIN ledger_lines l ON l.purchase_id = p.id
            WHERE p.buyer_id = $1
            ORDER BY p.created_at DESC, p.id, l.seller_id, l.product_id
            "#,
        )
        .bind(buyer_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("purchases_for_buyer", e))?;

        // Group the joined rows by purchase, preserving row order.
        let mut purchases: Vec<Purchase> = Vec::new();
        let mut open: Option<(PurchaseRow, Vec<LedgerLine>)> = None;

        for row in &rows {
            let header = PurchaseRow::from_row(row)
                .map_err(|e| StoreError::backend(format!("failed to deserialize purchase: {e}")))?;
            let line = ledger_line_from_row(row, header.id)?;

            match &mut open {
                Some((current, lines)) if current.id == header.id => lines.push(line),
                _ => {
                    if let Some((header, lines)) = open.take() {
                        purchases.push(header.into_purchase(lines)?);
                    }
                    open = Some((header, vec![line]));
                }
            }
        }
        if let Some((header, lines)) = open.take() {
            purchases.push(header.into_purchase(lines)?);
        }

        Ok(purchases)
    }

    #[instrument(skip(self), fields(caller = %caller, purchase_id = %purchase_id), err)]
    async fn mark_fulfilled(
        &self,
        caller: UserId,
        purchase_id: PurchaseId,
        product_id: ProductId,
    ) -> StoreResult<bool> {
        self.toggle_fulfillment(
            caller,
            purchase_id,
            product_id,
            FulfillmentStatus::Pending,
            FulfillmentStatus::Complete,
        )
        .await
    }

    #[instrument(skip(self), fields(caller = %caller, purchase_id = %purchase_id), err)]
    async fn mark_unfulfilled(
        &self,
        caller: UserId,
        purchase_id: PurchaseId,
        product_id: ProductId,
    ) -> StoreResult<bool> {
        self.toggle_fulfillment(
            caller,
            purchase_id,
            product_id,
            FulfillmentStatus::Complete,
            FulfillmentStatus::Pending,
        )
        .await
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            if let Some(code) = db_err.code() {
                match code.as_ref() {
                    // Serialization failure / deadlock: retryable conflict.
                    "40001" | "40P01" => StoreError::Conflict(msg),
                    // Unique violation: concurrent writer won.
                    "23505" => StoreError::Conflict(msg),
                    // Foreign key / check constraint violations.
                    "23503" | "23514" => StoreError::Integrity(msg),
                    _ => StoreError::Backend(msg),
                }
            } else {
                StoreError::Backend(msg)
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            StoreError::Backend(format!("unexpected row not found in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct AccountRow {
    id: uuid::Uuid,
    email: String,
    first_name: String,
    last_name: String,
    address: Option<String>,
    bio: Option<String>,
    balance_cents: i64,
    password_hash: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AccountRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            address: row.try_get("address")?,
            bio: row.try_get("bio")?,
            balance_cents: row.try_get("balance_cents")?,
            password_hash: row.try_get("password_hash")?,
        })
    }
}

impl AccountRow {
    fn into_account(self) -> StoreResult<Account> {
        Ok(Account::from_stored(
            UserId::from_uuid(self.id),
            self.email,
            self.first_name,
            self.last_name,
            self.address,
            self.bio,
            Money::from_cents(self.balance_cents)?,
            self.password_hash,
        ))
    }
}

#[derive(Debug)]
struct ProductRow {
    id: uuid::Uuid,
    name: String,
    description: String,
    category: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ProductRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
        })
    }
}

impl ProductRow {
    fn into_product(self) -> Product {
        Product::from_stored(
            ProductId::from_uuid(self.id),
            self.name,
            self.description,
            self.category,
        )
    }
}

fn offer_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<Offer> {
    let seller_id: uuid::Uuid = row
        .try_get("seller_id")
        .map_err(|e| StoreError::backend(format!("failed to read offer row: {e}")))?;
    let product_id: uuid::Uuid = row
        .try_get("product_id")
        .map_err(|e| StoreError::backend(format!("failed to read offer row: {e}")))?;
    let quantity: i64 = row
        .try_get("quantity")
        .map_err(|e| StoreError::backend(format!("failed to read offer row: {e}")))?;
    let price_cents: i64 = row
        .try_get("price_cents")
        .map_err(|e| StoreError::backend(format!("failed to read offer row: {e}")))?;

    Ok(Offer::new(
        UserId::from_uuid(seller_id),
        ProductId::from_uuid(product_id),
        quantity,
        Money::from_cents(price_cents)?,
    )?)
}

#[derive(Debug)]
struct PurchaseRow {
    id: PurchaseId,
    buyer_id: uuid::Uuid,
    address: String,
    created_at: DateTime<Utc>,
    fulfillment_status: i16,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for PurchaseRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        let id: uuid::Uuid = row.try_get("id")?;
        Ok(PurchaseRow {
            id: PurchaseId::from_uuid(id),
            buyer_id: row.try_get("buyer_id")?,
            address: row.try_get("address")?,
            created_at: row.try_get("created_at")?,
            fulfillment_status: row.try_get("fulfillment_status")?,
        })
    }
}

impl PurchaseRow {
    fn into_purchase(self, lines: Vec<LedgerLine>) -> StoreResult<Purchase> {
        let total = Money::sum(
            lines
                .iter()
                .map(|l| l.line_total())
                .collect::<Result<Vec<_>, _>>()?,
        )?;
        Ok(Purchase::from_stored(
            self.id,
            UserId::from_uuid(self.buyer_id),
            ShippingAddress::new(self.address)?,
            self.created_at,
            FulfillmentStatus::from_i16(self.fulfillment_status)?,
            lines,
            total,
        ))
    }
}

fn ledger_line_from_row(
    row: &sqlx::postgres::PgRow,
    purchase_id: PurchaseId,
) -> StoreResult<LedgerLine> {
    let seller_id: uuid::Uuid = row
        .try_get("seller_id")
        .map_err(|e| StoreError::backend(format!("failed to read ledger row: {e}")))?;
    let product_id: uuid::Uuid = row
        .try_get("product_id")
        .map_err(|e| StoreError::backend(format!("failed to read ledger row: {e}")))?;
    let quantity: i64 = row
        .try_get("quantity")
        .map_err(|e| StoreError::backend(format!("failed to read ledger row: {e}")))?;
    let unit_price_cents: i64 = row
        .try_get("unit_price_cents")
        .map_err(|e| StoreError::backend(format!("failed to read ledger row: {e}")))?;
    let line_status: i16 = row
        .try_get("line_status")
        .map_err(|e| StoreError::backend(format!("failed to read ledger row: {e}")))?;

    Ok(LedgerLine {
        purchase_id,
        seller_id: UserId::from_uuid(seller_id),
        product_id: ProductId::from_uuid(product_id),
        quantity,
        unit_price: Money::from_cents(unit_price_cents)?,
        status: FulfillmentStatus::from_i16(line_status)?,
    })
}
