//! Integration tests for the full marketplace storage surface.
//!
//! Runs against the in-memory backend, which shares the atomicity contract
//! (and the pricing code) with the Postgres backend.

use tradepost_accounts::Registration;
use tradepost_cart::CartKey;
use tradepost_catalog::ProductDraft;
use tradepost_checkout::{CheckoutOutcome, FulfillmentStatus, ShippingAddress};
use tradepost_core::{Entity, Money, ProductId, UserId};

use crate::market::MarketStore;
use crate::memory::InMemoryMarketStore;
use crate::error::StoreError;

fn cents(amount: i64) -> Money {
    Money::from_cents(amount).unwrap()
}

fn registration(email: &str) -> Registration {
    Registration {
        email: email.to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        address: Some("1 Main St".to_string()),
    }
}

fn address() -> ShippingAddress {
    ShippingAddress::new("221B Baker Street").unwrap()
}

struct Marketplace {
    store: InMemoryMarketStore,
    buyer: UserId,
    seller_x: UserId,
    seller_y: UserId,
    product_a: ProductId,
    product_b: ProductId,
}

/// A buyer with 100.00 and a cart of (productA, sellerX, qty 2 @ 10.00)
/// plus (productB, sellerY, qty 1 @ 50.00); both sellers stock 5 units.
async fn marketplace() -> Marketplace {
    let store = InMemoryMarketStore::new();

    let buyer = *store
        .register_account(registration("buyer@example.com"), "pass0")
        .await
        .unwrap()
        .id();
    let seller_x = *store
        .register_account(registration("x@example.com"), "pass1")
        .await
        .unwrap()
        .id();
    let seller_y = *store
        .register_account(registration("y@example.com"), "pass2")
        .await
        .unwrap()
        .id();

    store.top_up(buyer, cents(10_000)).await.unwrap();

    let product_a = *store
        .create_product(ProductDraft {
            name: "Cat Tree".to_string(),
            description: "A tall one".to_string(),
            category: "Furniture".to_string(),
        })
        .await
        .unwrap()
        .id();
    let product_b = *store
        .create_product(ProductDraft {
            name: "Cat Bed".to_string(),
            description: "A soft one".to_string(),
            category: "Furniture".to_string(),
        })
        .await
        .unwrap()
        .id();

    store
        .upsert_offer(seller_x, product_a, 5, cents(1_000))
        .await
        .unwrap();
    store
        .upsert_offer(seller_y, product_b, 5, cents(5_000))
        .await
        .unwrap();

    store
        .add_cart_item(
            CartKey {
                buyer_id: buyer,
                product_id: product_a,
                seller_id: seller_x,
            },
            2,
        )
        .await
        .unwrap();
    store
        .add_cart_item(
            CartKey {
                buyer_id: buyer,
                product_id: product_b,
                seller_id: seller_y,
            },
            1,
        )
        .await
        .unwrap();

    Marketplace {
        store,
        buyer,
        seller_x,
        seller_y,
        product_a,
        product_b,
    }
}

#[tokio::test]
async fn checkout_debits_buyer_and_credits_each_seller() {
    let m = marketplace().await;

    let outcome = m.store.create_purchase(m.buyer, address()).await.unwrap();
    let CheckoutOutcome::Completed(purchase) = outcome else {
        panic!("expected completed checkout, got {outcome:?}");
    };

    assert_eq!(purchase.total(), cents(7_000));
    assert_eq!(purchase.lines().len(), 2);
    assert!(
        purchase
            .lines()
            .iter()
            .all(|l| l.status == FulfillmentStatus::Pending)
    );

    // Conservation: the debit equals the sum of the credits.
    assert_eq!(m.store.account(m.buyer).await.unwrap().balance(), cents(3_000));
    assert_eq!(
        m.store.account(m.seller_x).await.unwrap().balance(),
        cents(2_000)
    );
    assert_eq!(
        m.store.account(m.seller_y).await.unwrap().balance(),
        cents(5_000)
    );

    // Cart cleared.
    assert_eq!(m.store.cart_item_count(m.buyer).await.unwrap(), 0);
    assert!(m.store.cart_items(m.buyer).await.unwrap().is_empty());

    // History shows the purchase with its lines.
    let history = m.store.purchases_for_buyer(m.buyer).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id(), purchase.id());
}

#[tokio::test]
async fn insufficient_balance_leaves_everything_unchanged() {
    let m = marketplace().await;
    // Drain to 10.00: 100.00 cart requires 70.00.
    m.store.withdraw(m.buyer, cents(9_000)).await.unwrap();

    let outcome = m.store.create_purchase(m.buyer, address()).await.unwrap();
    match outcome {
        CheckoutOutcome::InsufficientBalance {
            required,
            available,
        } => {
            assert_eq!(required, cents(7_000));
            assert_eq!(available, cents(1_000));
        }
        other => panic!("expected insufficient balance, got {other:?}"),
    }

    // No side effects: balances, cart, stock, history all untouched.
    assert_eq!(m.store.account(m.buyer).await.unwrap().balance(), cents(1_000));
    assert_eq!(m.store.account(m.seller_x).await.unwrap().balance(), Money::ZERO);
    assert_eq!(m.store.cart_item_count(m.buyer).await.unwrap(), 3);
    assert!(m.store.purchases_for_buyer(m.buyer).await.unwrap().is_empty());
    let offers = m.store.product_offers(m.product_a).await.unwrap();
    assert_eq!(offers[0].quantity(), 5);
}

#[tokio::test]
async fn empty_cart_checkout_is_idempotent() {
    let m = marketplace().await;

    let first = m.store.create_purchase(m.buyer, address()).await.unwrap();
    assert!(first.is_completed());
    let balance_after = m.store.account(m.buyer).await.unwrap().balance();

    // Cart is now empty: both further attempts refuse without effects.
    for _ in 0..2 {
        let outcome = m.store.create_purchase(m.buyer, address()).await.unwrap();
        assert_eq!(outcome, CheckoutOutcome::EmptyCart);
    }
    assert_eq!(m.store.account(m.buyer).await.unwrap().balance(), balance_after);
    assert_eq!(m.store.purchases_for_buyer(m.buyer).await.unwrap().len(), 1);
}

#[tokio::test]
async fn checkout_decrements_offer_stock() {
    let m = marketplace().await;
    m.store.create_purchase(m.buyer, address()).await.unwrap();

    let offers_a = m.store.product_offers(m.product_a).await.unwrap();
    assert_eq!(offers_a[0].quantity(), 3);
    let offers_b = m.store.product_offers(m.product_b).await.unwrap();
    assert_eq!(offers_b[0].quantity(), 4);
}

#[tokio::test]
async fn insufficient_stock_aborts_the_whole_checkout() {
    let m = marketplace().await;
    // Push the product A line to 6 against a stock of 5.
    m.store
        .update_cart_item(
            CartKey {
                buyer_id: m.buyer,
                product_id: m.product_a,
                seller_id: m.seller_x,
            },
            6,
        )
        .await
        .unwrap();
    // 6 * 10.00 + 50.00 is affordable with a 110.00 balance.
    m.store.top_up(m.buyer, cents(1_000)).await.unwrap();

    let outcome = m.store.create_purchase(m.buyer, address()).await.unwrap();
    match outcome {
        CheckoutOutcome::InsufficientStock {
            product_id,
            seller_id,
            requested,
            available,
        } => {
            assert_eq!(product_id, m.product_a);
            assert_eq!(seller_id, m.seller_x);
            assert_eq!(requested, 6);
            assert_eq!(available, 5);
        }
        other => panic!("expected insufficient stock, got {other:?}"),
    }

    // Nothing moved, including the other (satisfiable) line.
    assert_eq!(m.store.account(m.buyer).await.unwrap().balance(), cents(11_000));
    assert_eq!(m.store.product_offers(m.product_b).await.unwrap()[0].quantity(), 5);
    assert_eq!(m.store.cart_item_count(m.buyer).await.unwrap(), 7);
}

#[tokio::test]
async fn missing_offer_prices_the_line_at_zero() {
    let m = marketplace().await;
    // Seller Y never listed product A, yet it sits in the cart.
    let key = CartKey {
        buyer_id: m.buyer,
        product_id: m.product_a,
        seller_id: m.seller_y,
    };
    m.store.add_cart_item(key, 1).await.unwrap();

    let outcome = m.store.create_purchase(m.buyer, address()).await.unwrap();
    let CheckoutOutcome::Completed(purchase) = outcome else {
        panic!("expected completed checkout, got {outcome:?}");
    };

    // Still 70.00: the unbacked line carries no charge.
    assert_eq!(purchase.total(), cents(7_000));
    assert_eq!(purchase.lines().len(), 3);
    let free_line = purchase
        .lines()
        .iter()
        .find(|l| l.seller_id == m.seller_y && l.product_id == m.product_a)
        .unwrap();
    assert_eq!(free_line.unit_price, Money::ZERO);
}

#[tokio::test]
async fn adding_the_same_item_twice_merges_into_one_row() {
    let m = marketplace().await;
    let key = CartKey {
        buyer_id: m.buyer,
        product_id: m.product_a,
        seller_id: m.seller_x,
    };
    // Seeded with qty 2; adding 3 more merges to 5.
    let resulting = m.store.add_cart_item(key, 3).await.unwrap();
    assert_eq!(resulting, 5);

    let items = m.store.cart_items(m.buyer).await.unwrap();
    let row = items.iter().find(|l| l.product_id == m.product_a).unwrap();
    assert_eq!(row.quantity, 5);
    assert_eq!(row.line_total, cents(5_000));
}

#[tokio::test]
async fn zero_and_negative_updates_remove_the_row() {
    let m = marketplace().await;
    let key = CartKey {
        buyer_id: m.buyer,
        product_id: m.product_a,
        seller_id: m.seller_x,
    };

    assert_eq!(m.store.update_cart_item(key, 0).await.unwrap(), None);
    assert!(
        !m.store
            .cart_items(m.buyer)
            .await
            .unwrap()
            .iter()
            .any(|l| l.product_id == m.product_a)
    );

    let key_b = CartKey {
        buyer_id: m.buyer,
        product_id: m.product_b,
        seller_id: m.seller_y,
    };
    assert_eq!(m.store.update_cart_item(key_b, -1).await.unwrap(), None);
    assert_eq!(m.store.cart_item_count(m.buyer).await.unwrap(), 0);
}

#[tokio::test]
async fn updating_a_missing_row_returns_none() {
    let m = marketplace().await;
    let key = CartKey {
        buyer_id: m.buyer,
        product_id: m.product_b,
        seller_id: m.seller_x, // seller X never sold product B
    };
    assert_eq!(m.store.update_cart_item(key, 4).await.unwrap(), None);
}

#[tokio::test]
async fn remove_reports_whether_a_row_was_deleted() {
    let m = marketplace().await;
    let key = CartKey {
        buyer_id: m.buyer,
        product_id: m.product_a,
        seller_id: m.seller_x,
    };
    assert!(m.store.remove_cart_item(key).await.unwrap());
    assert!(!m.store.remove_cart_item(key).await.unwrap());
}

#[tokio::test]
async fn cart_views_aggregate_items_and_totals() {
    let m = marketplace().await;
    assert_eq!(m.store.cart_total(m.buyer).await.unwrap(), cents(7_000));
    assert_eq!(m.store.cart_item_count(m.buyer).await.unwrap(), 3);

    let items = m.store.cart_items(m.buyer).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().any(|l| l.product_name == "Cat Tree"));
    assert!(items.iter().all(|l| l.seller_name == "Test User"));
}

#[tokio::test]
async fn fulfillment_toggles_roll_up_to_the_purchase() {
    let m = marketplace().await;
    let outcome = m.store.create_purchase(m.buyer, address()).await.unwrap();
    let purchase_id = *outcome.purchase().unwrap().id();

    // A seller cannot touch another seller's line.
    assert!(
        !m.store
            .mark_fulfilled(m.seller_x, purchase_id, m.product_b)
            .await
            .unwrap()
    );

    assert!(
        m.store
            .mark_fulfilled(m.seller_x, purchase_id, m.product_a)
            .await
            .unwrap()
    );
    // Same transition twice: unchanged.
    assert!(
        !m.store
            .mark_fulfilled(m.seller_x, purchase_id, m.product_a)
            .await
            .unwrap()
    );

    let history = m.store.purchases_for_buyer(m.buyer).await.unwrap();
    assert_eq!(history[0].status(), FulfillmentStatus::Pending);

    assert!(
        m.store
            .mark_fulfilled(m.seller_y, purchase_id, m.product_b)
            .await
            .unwrap()
    );
    let history = m.store.purchases_for_buyer(m.buyer).await.unwrap();
    assert_eq!(history[0].status(), FulfillmentStatus::Complete);

    // Reverting one line reopens the purchase.
    assert!(
        m.store
            .mark_unfulfilled(m.seller_y, purchase_id, m.product_b)
            .await
            .unwrap()
    );
    let history = m.store.purchases_for_buyer(m.buyer).await.unwrap();
    assert_eq!(history[0].status(), FulfillmentStatus::Pending);
}

#[tokio::test]
async fn spending_and_sales_reports_use_recorded_prices() {
    let m = marketplace().await;
    m.store.create_purchase(m.buyer, address()).await.unwrap();

    // Repricing after the fact must not rewrite history.
    m.store
        .upsert_offer(m.seller_x, m.product_a, 3, cents(99_900))
        .await
        .unwrap();

    assert_eq!(m.store.total_spending(m.buyer).await.unwrap(), cents(7_000));
    assert_eq!(m.store.total_sales(m.seller_x).await.unwrap(), cents(2_000));
    assert_eq!(m.store.total_sales(m.seller_y).await.unwrap(), cents(5_000));
}

#[tokio::test]
async fn registering_a_taken_email_conflicts() {
    let m = marketplace().await;
    let err = m
        .store
        .register_account(registration("buyer@example.com"), "pass9")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn authenticate_verifies_the_password() {
    let m = marketplace().await;

    let found = m
        .store
        .authenticate(" Buyer@Example.com ", "pass0")
        .await
        .unwrap();
    assert_eq!(found.unwrap().id(), &m.buyer);

    assert!(
        m.store
            .authenticate("buyer@example.com", "wrong")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        m.store
            .authenticate("nobody@example.com", "pass0")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn default_seller_is_cheapest_in_stock() {
    let m = marketplace().await;
    // Seller Y undercuts on product A but is out of stock.
    m.store
        .upsert_offer(m.seller_y, m.product_a, 0, cents(100))
        .await
        .unwrap();
    assert_eq!(
        m.store.default_seller(m.product_a).await.unwrap(),
        Some(m.seller_x)
    );

    // Restocked, the cheaper seller wins.
    m.store
        .upsert_offer(m.seller_y, m.product_a, 1, cents(100))
        .await
        .unwrap();
    assert_eq!(
        m.store.default_seller(m.product_a).await.unwrap(),
        Some(m.seller_y)
    );
}

#[tokio::test]
async fn catalog_reads_serve_browsing_pages() {
    let m = marketplace().await;

    let product = m.store.product(m.product_a).await.unwrap();
    assert_eq!(product.name(), "Cat Tree");

    let furniture = m.store.products_in_category("Furniture").await.unwrap();
    assert_eq!(furniture.len(), 2);
    assert!(m.store.products_in_category("Toys").await.unwrap().is_empty());

    let offers = m.store.product_offers(m.product_a).await.unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].price(), cents(1_000));

    let inventory = m.store.offers_for_seller(m.seller_x).await.unwrap();
    assert_eq!(inventory.len(), 1);
    assert_eq!(inventory[0].product_id(), m.product_a);
}

#[tokio::test]
async fn wishlist_add_is_idempotent() {
    let m = marketplace().await;
    assert!(m.store.add_to_wishlist(m.buyer, m.product_a).await.unwrap());
    assert!(!m.store.add_to_wishlist(m.buyer, m.product_a).await.unwrap());
    assert_eq!(m.store.wishlist(m.buyer).await.unwrap().len(), 1);
}

#[tokio::test]
async fn withdraw_beyond_balance_fails_atomically() {
    let m = marketplace().await;
    let err = m.store.withdraw(m.buyer, cents(10_001)).await.unwrap_err();
    assert!(matches!(err, StoreError::Domain(_)));
    assert_eq!(m.store.account(m.buyer).await.unwrap().balance(), cents(10_000));
}

#[tokio::test]
async fn profile_update_rechecks_email_uniqueness() {
    let m = marketplace().await;
    let err = m
        .store
        .update_profile(
            m.seller_x,
            tradepost_accounts::ProfileUpdate {
                email: "buyer@example.com".to_string(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                address: None,
                bio: Some("now selling cat trees".to_string()),
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}
