use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::collections::HashMap;

use tradepost_accounts::Registration;
use tradepost_cart::{CartEntry, CartKey};
use tradepost_catalog::ProductDraft;
use tradepost_checkout::{ShippingAddress, price_cart};
use tradepost_core::{Entity, Money, ProductId, UserId};
use tradepost_store::{InMemoryMarketStore, MarketStore};
use uuid::Uuid;

fn cents(amount: i64) -> Money {
    Money::from_cents(amount).unwrap()
}

/// Pure pricing: N single-seller lines against a full price map.
fn bench_price_cart(c: &mut Criterion) {
    let mut group = c.benchmark_group("price_cart");

    for size in [1usize, 10, 100] {
        let buyer = UserId::from_uuid(Uuid::from_u128(1));
        let seller = UserId::from_uuid(Uuid::from_u128(2));

        let mut entries = Vec::with_capacity(size);
        let mut prices: HashMap<(ProductId, UserId), Money> = HashMap::new();
        for i in 0..size {
            let product = ProductId::from_uuid(Uuid::from_u128(100 + i as u128));
            entries.push(
                CartEntry::new(
                    CartKey {
                        buyer_id: buyer,
                        product_id: product,
                        seller_id: seller,
                    },
                    2,
                )
                .unwrap(),
            );
            prices.insert((product, seller), cents(1_000 + i as i64));
        }

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let priced =
                    price_cart(black_box(&entries), |p, s| prices.get(&(p, s)).copied()).unwrap();
                black_box(priced.grand_total)
            })
        });
    }

    group.finish();
}

/// Full checkout against the in-memory store: refill the cart and the
/// balance each iteration, then run the whole atomic conversion.
fn bench_checkout_roundtrip(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("tokio runtime");

    let store = InMemoryMarketStore::new();
    let (buyer, seller, product) = rt.block_on(async {
        let buyer = *store
            .register_account(
                Registration {
                    email: "buyer@example.com".to_string(),
                    first_name: "Bench".to_string(),
                    last_name: "Buyer".to_string(),
                    address: None,
                },
                "pass0",
            )
            .await
            .unwrap()
            .id();
        let seller = *store
            .register_account(
                Registration {
                    email: "seller@example.com".to_string(),
                    first_name: "Bench".to_string(),
                    last_name: "Seller".to_string(),
                    address: None,
                },
                "pass1",
            )
            .await
            .unwrap()
            .id();
        let product = *store
            .create_product(ProductDraft {
                name: "Cat Tree".to_string(),
                description: String::new(),
                category: "Furniture".to_string(),
            })
            .await
            .unwrap()
            .id();
        (buyer, seller, product)
    });

    c.bench_function("checkout/single_line_cart", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.upsert_offer(seller, product, 10, cents(1_000)).await.unwrap();
                store.top_up(buyer, cents(2_000)).await.unwrap();
                store
                    .add_cart_item(
                        CartKey {
                            buyer_id: buyer,
                            product_id: product,
                            seller_id: seller,
                        },
                        2,
                    )
                    .await
                    .unwrap();
                let outcome = store
                    .create_purchase(buyer, ShippingAddress::new("1 Main St").unwrap())
                    .await
                    .unwrap();
                black_box(outcome.is_completed())
            })
        })
    });
}

criterion_group!(benches, bench_price_cart, bench_checkout_roundtrip);
criterion_main!(benches);
