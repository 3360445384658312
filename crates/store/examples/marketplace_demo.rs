//! End-to-end walkthrough against the in-memory store: register a buyer and
//! two sellers, stock the catalog, fill a cart, check out, then fulfill.
//!
//! Run with `cargo run -p tradepost-store --example marketplace_demo`.

use tradepost_accounts::Registration;
use tradepost_cart::CartKey;
use tradepost_catalog::ProductDraft;
use tradepost_checkout::{CheckoutOutcome, ShippingAddress};
use tradepost_core::{Entity, Money};
use tradepost_store::{InMemoryMarketStore, MarketStore};
use tracing::info;

fn registration(email: &str, first: &str, last: &str) -> Registration {
    Registration {
        email: email.to_string(),
        first_name: first.to_string(),
        last_name: last.to_string(),
        address: Some("1 Main St".to_string()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tradepost_observability::init();

    let store = InMemoryMarketStore::new();

    let buyer = *store
        .register_account(registration("ada@example.com", "Ada", "Lovelace"), "pass0")
        .await?
        .id();
    let seller_x = *store
        .register_account(registration("x@example.com", "Xavier", "Stone"), "pass1")
        .await?
        .id();
    let seller_y = *store
        .register_account(registration("y@example.com", "Yara", "Reed"), "pass2")
        .await?
        .id();

    store.top_up(buyer, Money::from_cents(10_000)?).await?;

    let tree = *store
        .create_product(ProductDraft {
            name: "Cat Tree".to_string(),
            description: "Five levels, sisal posts".to_string(),
            category: "Furniture".to_string(),
        })
        .await?
        .id();
    let bed = *store
        .create_product(ProductDraft {
            name: "Cat Bed".to_string(),
            description: "Donut shaped".to_string(),
            category: "Furniture".to_string(),
        })
        .await?
        .id();

    store.upsert_offer(seller_x, tree, 5, Money::from_cents(1_000)?).await?;
    store.upsert_offer(seller_y, bed, 5, Money::from_cents(5_000)?).await?;

    store
        .add_cart_item(
            CartKey {
                buyer_id: buyer,
                product_id: tree,
                seller_id: seller_x,
            },
            2,
        )
        .await?;
    // No seller named: the default-seller policy picks one.
    let chosen = store.default_seller(bed).await?.expect("bed has a seller");
    store
        .add_cart_item(
            CartKey {
                buyer_id: buyer,
                product_id: bed,
                seller_id: chosen,
            },
            1,
        )
        .await?;

    let total = store.cart_total(buyer).await?;
    info!(%total, "cart ready");

    let outcome = store
        .create_purchase(buyer, ShippingAddress::new("221B Baker Street")?)
        .await?;
    let CheckoutOutcome::Completed(purchase) = outcome else {
        anyhow::bail!("checkout refused: {outcome:?}");
    };
    info!(
        purchase = %purchase.id(),
        total = %purchase.total(),
        lines = purchase.lines().len(),
        "checkout complete"
    );

    store.mark_fulfilled(seller_x, *purchase.id(), tree).await?;
    store.mark_fulfilled(seller_y, *purchase.id(), bed).await?;

    let history = store.purchases_for_buyer(buyer).await?;
    let status = history[0].status();
    let balance = store.account(buyer).await?.balance();
    info!(%status, %balance, "purchase fulfilled");

    Ok(())
}
