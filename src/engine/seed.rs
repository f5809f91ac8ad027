use serde_json::{json, Value};

use crate::engine::record::{Record, CREATED_AT, UPDATED_AT};
use crate::engine::store::Collections;

const SEED_TIME: &str = "2024-01-01T00:00:00.000Z";

/// The demonstration dataset loaded when the durable slot is empty or unreadable.
pub fn demo_collections() -> Collections {
    let mut collections = Collections::new();
    collections.insert(
        "businesses".to_string(),
        rows(json!([
            {"id": "biz-1", "name": "Casa Verde", "category": "restaurant", "zone_id": "zone-1", "active": true},
            {"id": "biz-2", "name": "Corner Pharmacy", "category": "pharmacy", "zone_id": "zone-2", "active": true}
        ])),
    );
    collections.insert(
        "zones".to_string(),
        rows(json!([
            {"id": "zone-1", "name": "Downtown", "delivery_fee": 2.5, "active": true},
            {"id": "zone-2", "name": "Riverside", "delivery_fee": 3.0, "active": true}
        ])),
    );
    collections.insert(
        "products".to_string(),
        rows(json!([
            {"id": "prod-1", "business_id": "biz-1", "name": "Margherita Pizza", "price": 11.0, "stock": 40},
            {"id": "prod-2", "business_id": "biz-1", "name": "Lemonade", "price": 3.5, "stock": 120},
            {"id": "prod-3", "business_id": "biz-2", "name": "Ibuprofen 200mg", "price": 6.25, "stock": 15}
        ])),
    );
    collections.insert(
        "drivers".to_string(),
        rows(json!([
            {"id": "drv-1", "name": "Ana Ruiz", "status": "available", "zone_id": "zone-1"},
            {"id": "drv-2", "name": "Marco Diaz", "status": "offline", "zone_id": "zone-2"}
        ])),
    );
    collections.insert(
        "orders".to_string(),
        rows(json!([
            {"id": "ord-1", "business_id": "biz-1", "driver_id": "drv-1", "status": "delivering", "total": 25.5},
            {"id": "ord-2", "business_id": "biz-2", "driver_id": null, "status": "pending", "total": 12.5}
        ])),
    );
    collections.insert("messages".to_string(), Vec::new());
    collections
}

fn rows(v: Value) -> Vec<Record> {
    match v {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(mut row) => {
                    row.insert(CREATED_AT.to_string(), Value::String(SEED_TIME.to_string()));
                    row.insert(UPDATED_AT.to_string(), Value::String(SEED_TIME.to_string()));
                    Some(row)
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
