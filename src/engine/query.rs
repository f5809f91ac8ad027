use std::fmt;
use std::future::IntoFuture;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::engine::envelope::Envelope;
use crate::engine::filter::{apply_filters, compare_values, Filter, FilterOp};
use crate::engine::record::Record;
use crate::engine::store::Store;
use crate::{Error, Result};

/// A handle on one named collection. Every query starts here.
#[derive(Clone)]
pub struct Collection {
    store: Store,
    name: String,
}

impl Collection {
    pub(crate) fn new(store: Store, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn select(&self) -> Query {
        self.query(Operation::Select)
    }

    /// Inserts one object or an array of objects.
    pub fn insert(&self, data: impl Into<Value>) -> Query {
        self.query(Operation::Insert(data.into()))
    }

    /// Merges `patch` into every row matched by the query's filters.
    pub fn update(&self, patch: impl Into<Value>) -> Query {
        self.query(Operation::Update(patch.into()))
    }

    /// Removes every row matched by the query's filters.
    pub fn delete(&self) -> Query {
        self.query(Operation::Delete)
    }

    fn query(&self, operation: Operation) -> Query {
        Query {
            store: self.store.clone(),
            collection: self.name.clone(),
            operation,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }
}

/// What a [`Query`] does when it runs. Fixed when the query is created.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Select,
    Insert(Value),
    Update(Value),
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderOptions {
    pub ascending: bool,
}

impl Default for OrderOptions {
    fn default() -> Self {
        Self { ascending: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Many,
    Single,
    MaybeSingle,
}

/// A lazily executed query or mutation against one collection.
///
/// Builder methods consume and return the query. Nothing touches the store
/// until the query is awaited or one of [`execute`](Query::execute),
/// [`single`](Query::single) or [`maybe_single`](Query::maybe_single) runs.
///
/// ```no_run
/// # async fn demo(store: dispatch_store::Store) {
/// let open = store
///     .collection("orders")
///     .select()
///     .in_("status", vec!["pending", "preparing"])
///     .order_with("total", Default::default())
///     .limit(20)
///     .await;
/// # }
/// ```
pub struct Query {
    store: Store,
    collection: String,
    operation: Operation,
    filters: Vec<Filter>,
    order: Option<(String, OrderOptions)>,
    limit: Option<usize>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("collection", &self.collection)
            .field("operation", &self.operation)
            .field("filters", &self.filters)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .finish()
    }
}

impl Query {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn filter(mut self, column: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::new(column, op, value));
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Neq, value)
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gt, value)
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gte, value)
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lt, value)
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lte, value)
    }

    pub fn like(self, column: &str, pattern: &str) -> Self {
        self.filter(column, FilterOp::Like, pattern)
    }

    pub fn ilike(self, column: &str, pattern: &str) -> Self {
        self.filter(column, FilterOp::Ilike, pattern)
    }

    pub fn in_<V: Into<Value>>(self, column: &str, values: Vec<V>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.filter(column, FilterOp::In, Value::Array(values))
    }

    /// Sorts ascending by `column`.
    pub fn order(self, column: &str) -> Self {
        self.order_with(column, OrderOptions::default())
    }

    pub fn order_with(mut self, column: &str, options: OrderOptions) -> Self {
        self.order = Some((column.to_string(), options));
        self
    }

    /// Keeps at most `n` rows, applied after ordering.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Runs the query. Selects, inserts and updates return an array of rows;
    /// deletes return `null`.
    pub async fn execute(self) -> Envelope {
        self.run(Shape::Many).await
    }

    /// Runs the query and returns its first row, failing if there is none.
    pub async fn single(self) -> Envelope {
        self.run(Shape::Single).await
    }

    /// Runs the query and returns its first row, or `null` if there is none.
    pub async fn maybe_single(self) -> Envelope {
        self.run(Shape::MaybeSingle).await
    }

    async fn run(self, shape: Shape) -> Envelope {
        let rows = match self.rows().await {
            Ok(rows) => rows,
            Err(e) => return Envelope::err(e.to_string()),
        };
        match (shape, rows) {
            (Shape::Many, Some(rows)) => Envelope::ok(into_array(rows)),
            (Shape::Many, None) => Envelope::ok(Value::Null),
            (Shape::Single, rows) => match rows.and_then(|r| r.into_iter().next()) {
                Some(row) => Envelope::ok(Value::Object(row)),
                None => Envelope::err(Error::NoRows.to_string()),
            },
            (Shape::MaybeSingle, rows) => Envelope::ok(
                rows.and_then(|r| r.into_iter().next())
                    .map(Value::Object)
                    .unwrap_or(Value::Null),
            ),
        }
    }

    /// The affected rows, or `None` for deletes.
    async fn rows(self) -> Result<Option<Vec<Record>>> {
        let Query {
            store,
            collection,
            operation,
            filters,
            order,
            limit,
        } = self;

        match operation {
            Operation::Select => {
                let mut rows = apply_filters(&store.read_rows(&collection), &filters);
                if let Some((column, options)) = order {
                    rows.sort_by(|a, b| {
                        let a = a.get(&column).unwrap_or(&Value::Null);
                        let b = b.get(&column).unwrap_or(&Value::Null);
                        let ord = compare_values(a, b);
                        if options.ascending {
                            ord
                        } else {
                            ord.reverse()
                        }
                    });
                }
                if let Some(n) = limit {
                    rows.truncate(n);
                }
                Ok(Some(rows))
            }
            Operation::Insert(data) => {
                let rows = into_rows(data)?;
                if rows.is_empty() {
                    return Ok(Some(rows));
                }
                Ok(Some(store.insert_rows(&collection, rows).await))
            }
            Operation::Update(patch) => {
                let Value::Object(patch) = patch else {
                    return Err(Error::Mutation("update payload must be an object".to_string()));
                };
                Ok(Some(store.update_rows(&collection, &filters, &patch).await))
            }
            Operation::Delete => {
                store.delete_rows(&collection, &filters).await;
                Ok(None)
            }
        }
    }
}

impl IntoFuture for Query {
    type Output = Envelope;
    type IntoFuture = BoxFuture<'static, Envelope>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.execute())
    }
}

fn into_rows(data: Value) -> Result<Vec<Record>> {
    match data {
        Value::Object(row) => Ok(vec![row]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(Error::Mutation(format!("cannot insert non-object row: {}", other))),
            })
            .collect(),
        other => Err(Error::Mutation(format!("cannot insert non-object row: {}", other))),
    }
}

fn into_array(rows: Vec<Record>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::{CREATED_AT, ID_FIELD, UPDATED_AT};
    use crate::engine::store::EventType;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    async fn store_with_orders() -> Store {
        let store = Store::in_memory();
        store
            .collection("orders")
            .insert(json!([
                {"id": "o1", "status": "pending", "total": 30, "customer": "Ana"},
                {"id": "o2", "status": "delivered", "total": 12, "customer": "bruno"},
                {"id": "o3", "status": "pending", "total": 55, "customer": "Carla"},
                {"id": "o4", "status": "cancelled", "total": 8, "customer": "Anabel"}
            ]))
            .await;
        store
    }

    fn ids(envelope: &Envelope) -> Vec<String> {
        envelope.data
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_insert_then_single() {
        let store = Store::in_memory();
        let products = store.collection("products");
        let inserted = products.insert(json!({"name": "Widget", "price": 10})).await;
        assert!(inserted.success);

        let found = products.select().eq("name", "Widget").single().await;
        assert!(found.success);
        assert!(found.error.is_none());
        assert_eq!(found.data["price"], json!(10));
        assert!(found.data[ID_FIELD].as_str().is_some_and(|id| !id.is_empty()));
        assert!(found.data[CREATED_AT].is_string());
        assert!(found.data[UPDATED_AT].is_string());
        assert_eq!(found.data, inserted.data[0]);
    }

    #[tokio::test]
    async fn test_select_filters_order_limit() {
        let store = store_with_orders().await;
        let res = store
            .collection("orders")
            .select()
            .neq("status", "cancelled")
            .order_with("total", OrderOptions { ascending: false })
            .limit(2)
            .await;
        assert_eq!(ids(&res), vec!["o3", "o1"]);

        let res = store.collection("orders").select().order("total").await;
        assert_eq!(ids(&res), vec!["o4", "o2", "o1", "o3"]);
    }

    #[tokio::test]
    async fn test_select_preserves_insertion_order() {
        let store = store_with_orders().await;
        let res = store.collection("orders").select().await;
        assert_eq!(ids(&res), vec!["o1", "o2", "o3", "o4"]);
    }

    #[tokio::test]
    async fn test_like_in_and_ranges() {
        let store = store_with_orders().await;
        let orders = store.collection("orders");

        assert_eq!(ids(&orders.select().like("customer", "%Ana%").await), vec!["o1", "o4"]);
        assert_eq!(ids(&orders.select().ilike("customer", "%BRUNO%").await), vec!["o2"]);
        assert_eq!(
            ids(&orders.select().in_("status", vec!["delivered", "cancelled"]).await),
            vec!["o2", "o4"]
        );
        assert_eq!(ids(&orders.select().gt("total", 12).lte("total", 55).await), vec!["o1", "o3"]);
        assert_eq!(ids(&orders.select().gte("total", 12).lt("total", 30).await), vec!["o2"]);
    }

    #[tokio::test]
    async fn test_single_and_maybe_single_on_empty() {
        let store = store_with_orders().await;
        let orders = store.collection("orders");

        let none = orders.select().eq("status", "lost").single().await;
        assert!(!none.success);
        assert_eq!(none.data, Value::Null);
        assert_eq!(none.error.as_deref(), Some("no rows returned"));

        let maybe = orders.select().eq("status", "lost").maybe_single().await;
        assert!(maybe.success);
        assert_eq!(maybe.data, Value::Null);

        let first = orders.select().eq("status", "pending").maybe_single().await;
        assert_eq!(first.data["id"], json!("o1"));
    }

    #[tokio::test]
    async fn test_update_matching_rows() {
        let store = store_with_orders().await;
        let orders = store.collection("orders");

        let res = orders
            .update(json!({"status": "preparing"}))
            .eq("status", "pending")
            .await;
        assert!(res.success);
        assert_eq!(ids(&res), vec!["o1", "o3"]);

        let preparing = orders.select().eq("status", "preparing").await;
        assert_eq!(ids(&preparing), vec!["o1", "o3"]);
        assert_eq!(ids(&orders.select().eq("status", "pending").await), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_update_rejects_non_object() {
        let store = store_with_orders().await;
        let res = store.collection("orders").update(json!(5)).await;
        assert!(!res.success);
        assert!(res.error.is_some());
    }

    #[tokio::test]
    async fn test_delete_returns_null() {
        let store = store_with_orders().await;
        let orders = store.collection("orders");

        let res = orders.delete().lt("total", 20).await;
        assert!(res.success);
        assert_eq!(res.data, Value::Null);
        assert_eq!(ids(&orders.select().await), vec!["o1", "o3"]);
    }

    #[tokio::test]
    async fn test_insert_rejects_scalar_rows() {
        let store = Store::in_memory();
        let res = store.collection("products").insert(json!([{"a": 1}, 2])).await;
        assert!(!res.success);
        assert!(store.collection("products").select().await.data.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_insert_emits_event_per_row() {
        let store = Store::in_memory();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = store.subscribe("messages", move |e| {
            sink.lock().unwrap().push(e.event_type);
            Ok(())
        });

        store
            .collection("messages")
            .insert(json!([{"body": "hi"}, {"body": "there"}]))
            .await;
        assert_eq!(*events.lock().unwrap(), vec![EventType::Insert, EventType::Insert]);
    }

    #[tokio::test]
    async fn test_query_is_lazy() {
        let store = Store::in_memory();
        let pending = store.collection("drivers").insert(json!({"name": "late"}));
        assert!(store.collection("drivers").select().await.data.as_array().unwrap().is_empty());

        pending.await;
        assert_eq!(store.collection("drivers").select().await.data.as_array().unwrap().len(), 1);
    }
}
