use std::sync::Arc;
use std::time::Duration;

use dispatch_store::cache::ReadCache;
use dispatch_store::engine::{DurableSlot, FileSlot, MemorySlot, Store};
use dispatch_store::fetch::{fetcher, mutator, FetchClient, MutationOptions, QueryOptions, QueryStatus};
use dispatch_store::{Envelope, Error};
use serde_json::{json, Value};
use tempfile::tempdir;

fn orders_list(store: &Store) -> dispatch_store::fetch::Fetcher {
    let store = store.clone();
    fetcher(move || {
        let store = store.clone();
        async move { Ok::<_, Error>(Value::from(store.collection("orders").select().order("total").await)) }
    })
}

#[tokio::test]
async fn test_round_trip_persistence() {
    let dir = tempdir().unwrap();
    let slot: Arc<dyn DurableSlot> = Arc::new(FileSlot::new(dir.path()).unwrap());

    let store = Store::open(slot.clone(), "console").await;
    store.collection("orders").delete().await;
    for i in 0..5 {
        store
            .collection("orders")
            .insert(json!({"ref": format!("R-{}", i), "total": i * 10}))
            .await;
    }
    let before = store.collection("orders").select().await;

    let reopened = Store::open(slot, "console").await;
    let after = reopened.collection("orders").select().await;
    assert_eq!(after.data.as_array().unwrap().len(), 5);
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_query_reads_through_store() {
    let store = Store::open(Arc::new(MemorySlot::new()), "console").await;
    let client = FetchClient::new(Arc::new(ReadCache::new()));

    let q = client.query("orders:list:all", orders_list(&store), QueryOptions::new());
    let snap = q.start().await;
    assert_eq!(snap.status(), QueryStatus::Success);
    // seeded orders, sorted by total
    let ids: Vec<&str> = snap
        .data
        .as_ref()
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["ord-2", "ord-1"]);
}

#[tokio::test]
async fn test_mutation_writes_store_and_invalidates_lists() {
    let store = Store::open(Arc::new(MemorySlot::new()), "console").await;
    let client = FetchClient::new(Arc::new(ReadCache::new()));

    let list = client.query("orders:list:all", orders_list(&store), QueryOptions::new());
    list.start().await;
    client.cache().set("orders:list:pending", json!([]), Duration::from_secs(60));
    client.cache().set("orders:detail:42", json!({"id": "42"}), Duration::from_secs(60));

    let writer = store.clone();
    let create = client.mutation(
        mutator(move |vars| {
            let store = writer.clone();
            async move { Ok::<_, Error>(Value::from(store.collection("orders").insert(vars).await)) }
        }),
        MutationOptions::new().invalidate_pattern("orders:list:*"),
    );

    let created = create
        .try_mutate(json!({"business_id": "biz-1", "status": "pending", "total": 99}))
        .await
        .unwrap();
    assert_eq!(created[0]["total"], json!(99));

    assert!(!client.cache().contains_key("orders:list:all"));
    assert!(!client.cache().contains_key("orders:list:pending"));
    assert!(client.cache().contains_key("orders:detail:42"));

    let refreshed = list.refetch().await.unwrap().unwrap();
    assert_eq!(refreshed.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_failed_write_rolls_back_optimistic_cart() {
    let store = Store::in_memory();
    let client = FetchClient::new(Arc::new(ReadCache::new()));

    let add_item = client.mutation(
        mutator(|_| async { Ok::<_, Error>(Value::from(Envelope::err("product out of stock"))) }),
        MutationOptions::new().optimistic("cart:1", |prev, _| {
            let qty = prev.as_ref().and_then(|v| v["qty"].as_i64()).unwrap_or(0);
            Ok(json!({"qty": qty + 1}))
        }),
    );

    let snap = add_item.mutate(json!({"product_id": "prod-3"})).await;
    assert_eq!(snap.error.unwrap().message, "product out of stock");
    assert_eq!(client.cache().get("cart:1"), None);
    assert!(store.collection("carts").select().await.data.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_change_feed_drives_invalidation() {
    let store = Store::in_memory();
    let cache = Arc::new(ReadCache::new());
    cache.set("drivers:list:all", json!([]), Duration::from_secs(60));
    cache.set("zones:list:all", json!([]), Duration::from_secs(60));

    let sink = cache.clone();
    let sub = store.subscribe("drivers", move |_| {
        sink.clear_pattern("drivers:*");
        Ok(())
    });

    store.collection("drivers").insert(json!({"name": "Lia", "status": "available"})).await;
    assert!(!cache.contains_key("drivers:list:all"));
    assert!(cache.contains_key("zones:list:all"));

    sub.unsubscribe();
    cache.set("drivers:list:all", json!([]), Duration::from_secs(60));
    store.collection("drivers").delete().await;
    assert!(cache.contains_key("drivers:list:all"));
}
