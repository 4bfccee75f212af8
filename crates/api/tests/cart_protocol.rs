//! End-to-end tests of the cart mutation protocol over the in-memory
//! store, with tiny store pages so every enumeration path paginates.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use cartage_api::cart::{CartError, CartIdentity, CartRepository};
use cartage_api::stock::{StoreStockOracle, stock_item};
use cartage_api::store::KeyValueStore;
use cartage_api::store::memory::MemoryStore;
use cartage_core::{CartId, ItemId, WarehouseId};

const CART_TABLE: &str = "carts";
const STOCK_TABLE: &str = "stock";

async fn fixture() -> (CartRepository, MemoryStore) {
    let store = MemoryStore::with_page_size(2);
    store
        .create_table(CART_TABLE, "cart_id", Some("item_key"))
        .await;
    store
        .create_table(STOCK_TABLE, "item_id", Some("warehouse_id"))
        .await;

    let shared: Arc<dyn KeyValueStore> = Arc::new(store.clone());
    let stock = Arc::new(StoreStockOracle::new(
        Arc::clone(&shared),
        STOCK_TABLE,
        "warehouse_id_index",
    ));
    (CartRepository::new(shared, stock, CART_TABLE, 7), store)
}

async fn seed_stock(store: &MemoryStore, item: i64, warehouse: &str, on_hand: i64) {
    store
        .put(
            STOCK_TABLE,
            stock_item(ItemId::new(item), &WarehouseId::new(warehouse), on_hand),
        )
        .await
        .unwrap();
}

fn identity(cart: &str) -> CartIdentity {
    CartIdentity::resolve(None, Some(cart))
}

// Property 1: the first successful bind fixes the warehouse; every later
// bind with a different warehouse conflicts, carrying exactly that value,
// indefinitely.
#[tokio::test]
async fn bind_once_invariant() {
    let (repo, _store) = fixture().await;
    let caller = identity("cart-1");
    let w1 = WarehouseId::new("w1");
    let w2 = WarehouseId::new("w2");

    repo.bind_warehouse(&caller, &w1).await.unwrap();

    for _ in 0..5 {
        match repo.bind_warehouse(&caller, &w2).await.unwrap_err() {
            CartError::WarehouseConflict { bound } => assert_eq!(bound, Some(w1.clone())),
            other => panic!("expected warehouse conflict, got {other:?}"),
        }
        // Rebinding the original warehouse stays idempotent throughout.
        repo.bind_warehouse(&caller, &w1).await.unwrap();
    }
}

// Property 2: N concurrent adds for the same line sum their quantities
// exactly, independent of interleaving.
#[tokio::test]
async fn quantity_accumulation_under_concurrency() {
    let (repo, store) = fixture().await;
    seed_stock(&store, 42, "w1", 10_000).await;

    let quantities: Vec<i64> = (1..=16).collect();
    let expected: i64 = quantities.iter().sum();

    let mut handles = Vec::new();
    for qty in quantities {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.add_item(
                &identity("cart-1"),
                &WarehouseId::new("w1"),
                ItemId::new(42),
                qty,
            )
            .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let snapshot = repo.read(&CartId::new("cart-1")).await.unwrap();
    assert_eq!(snapshot.lines.len(), 1);
    assert_eq!(snapshot.lines.first().unwrap().quantity, expected);
}

// Property 3: a zero-quantity set deletes the line; repeating it on the
// absent line is a no-op that still reports removal.
#[tokio::test]
async fn zero_quantity_deletes_line() {
    let (repo, store) = fixture().await;
    seed_stock(&store, 7, "w1", 50).await;
    let caller = identity("cart-1");
    repo.add_item(&caller, &WarehouseId::new("w1"), ItemId::new(7), 3)
        .await
        .unwrap();

    repo.set_quantity(&caller.cart_id, ItemId::new(7), 0)
        .await
        .unwrap();
    let snapshot = repo.read(&caller.cart_id).await.unwrap();
    assert!(
        snapshot
            .lines
            .iter()
            .all(|line| line.item_id != ItemId::new(7))
    );

    // Second removal of the same line: no-op, same outcome.
    let outcome = repo
        .set_quantity(&caller.cart_id, ItemId::new(7), 0)
        .await
        .unwrap();
    assert_eq!(outcome, cartage_api::cart::QuantityUpdate::Removed);
}

// Property 4: an out-of-stock add writes no line, but the bind performed
// on the way stays visible.
#[tokio::test]
async fn out_of_stock_rejection_leaves_bind() {
    let (repo, store) = fixture().await;
    seed_stock(&store, 7, "w1", 0).await;
    let caller = identity("cart-1");

    let err = repo
        .add_item(&caller, &WarehouseId::new("w1"), ItemId::new(7), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, CartError::OutOfStock(_)));

    let snapshot = repo.read(&caller.cart_id).await.unwrap();
    assert!(snapshot.lines.is_empty());
    assert_eq!(
        snapshot.meta.unwrap().warehouse_id,
        Some(WarehouseId::new("w1"))
    );
}

// Property 5: clear removes META and every line across store pages, and a
// second clear deletes nothing.
#[tokio::test]
async fn clear_is_exhaustive_and_idempotent() {
    let (repo, store) = fixture().await;
    let caller = identity("cart-1");
    for item in 1..=7 {
        seed_stock(&store, item, "w1", 10).await;
        repo.add_item(&caller, &WarehouseId::new("w1"), ItemId::new(item), 1)
            .await
            .unwrap();
    }

    let deleted = repo.clear(&caller.cart_id).await.unwrap();
    assert_eq!(deleted, 8, "META plus seven lines");

    let snapshot = repo.read(&caller.cart_id).await.unwrap();
    assert!(snapshot.meta.is_none());
    assert!(snapshot.lines.is_empty());

    assert_eq!(repo.clear(&caller.cart_id).await.unwrap(), 0);
}

// Concurrent first-adds race the binding; exactly one warehouse wins and
// every add that lost the race reports the winner.
#[tokio::test]
async fn concurrent_first_adds_bind_one_warehouse() {
    let (repo, store) = fixture().await;
    seed_stock(&store, 1, "w1", 100).await;
    seed_stock(&store, 1, "w2", 100).await;

    let mut handles = Vec::new();
    for warehouse in ["w1", "w2", "w1", "w2", "w1", "w2"] {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.add_item(
                &identity("cart-1"),
                &WarehouseId::new(warehouse),
                ItemId::new(1),
                1,
            )
            .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => successes += 1,
            Err(CartError::WarehouseConflict { bound }) => assert!(bound.is_some()),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert!(successes >= 1);

    let snapshot = repo.read(&CartId::new("cart-1")).await.unwrap();
    let bound = snapshot.meta.unwrap().warehouse_id.unwrap();
    // Every surviving line belongs to the winning warehouse, and the
    // quantities of winning adds are all accounted for.
    assert!(
        snapshot
            .lines
            .iter()
            .all(|line| line.warehouse_id == bound)
    );
    assert_eq!(
        snapshot.lines.iter().map(|l| l.quantity).sum::<i64>(),
        successes
    );
}

// Anonymous and authenticated carts coexist under different identities.
#[tokio::test]
async fn authenticated_and_anonymous_carts_are_distinct() {
    let (repo, store) = fixture().await;
    seed_stock(&store, 9, "w1", 10).await;

    let anon = CartIdentity::resolve(None, None);
    let auth = CartIdentity::resolve(Some("subject-7"), None);
    assert!(anon.freshly_issued);
    assert!(!auth.freshly_issued);

    repo.add_item(&anon, &WarehouseId::new("w1"), ItemId::new(9), 1)
        .await
        .unwrap();
    repo.add_item(&auth, &WarehouseId::new("w1"), ItemId::new(9), 2)
        .await
        .unwrap();

    assert_eq!(
        repo.read(&anon.cart_id)
            .await
            .unwrap()
            .lines
            .first()
            .unwrap()
            .quantity,
        1
    );
    let auth_snapshot = repo.read(&auth.cart_id).await.unwrap();
    assert_eq!(auth_snapshot.lines.first().unwrap().quantity, 2);
    assert_eq!(
        auth_snapshot.meta.unwrap().user_id,
        Some(cartage_core::UserId::new("subject-7"))
    );
}
