use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use serde_json::Value;

use crate::fetch::{unwrap_response, ErrorKind, FetchClient, FetchError, Mutator};
use crate::Result;

type OptimisticUpdater = Arc<dyn Fn(Option<Value>, &Value) -> Result<Value> + Send + Sync>;
type SuccessCallback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&FetchError, &Value) + Send + Sync>;
type SettledCallback = Arc<dyn Fn(Option<&Value>, Option<&FetchError>, &Value) + Send + Sync>;

#[derive(Clone)]
struct OptimisticTransform {
    key: String,
    updater: OptimisticUpdater,
}

/// What happens around a mutation: cache invalidation after success, an
/// optional optimistic transform before the call, and lifecycle callbacks.
///
/// Callbacks receive the mutation variables as their last argument.
#[derive(Clone, Default)]
pub struct MutationOptions {
    invalidate_keys: Vec<String>,
    invalidate_patterns: Vec<String>,
    optimistic: Option<OptimisticTransform>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    on_settled: Option<SettledCallback>,
}

impl MutationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate_key(mut self, key: impl Into<String>) -> Self {
        self.invalidate_keys.push(key.into());
        self
    }

    /// `*` in a pattern matches any run of characters, e.g. `orders:list:*`.
    pub fn invalidate_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.invalidate_patterns.push(pattern.into());
        self
    }

    /// Applies `updater` to the value cached under `key` before the mutation
    /// runs, and rolls it back if the mutation fails.
    pub fn optimistic<F>(mut self, key: impl Into<String>, updater: F) -> Self
    where
        F: Fn(Option<Value>, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.optimistic = Some(OptimisticTransform {
            key: key.into(),
            updater: Arc::new(updater),
        });
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&FetchError, &Value) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Runs after `on_success`/`on_error`, whatever the outcome.
    pub fn on_settled<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&Value>, Option<&FetchError>, &Value) + Send + Sync + 'static,
    {
        self.on_settled = Some(Arc::new(f));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MutationSnapshot {
    pub data: Option<Value>,
    pub error: Option<FetchError>,
    pub loading: bool,
}

struct MutationInner {
    client: FetchClient,
    mutator: Mutator,
    options: MutationOptions,
    state: Mutex<MutationSnapshot>,
}

#[derive(Clone)]
pub struct MutationObserver {
    inner: Arc<MutationInner>,
}

impl MutationObserver {
    pub(crate) fn new(client: FetchClient, mutator: Mutator, options: MutationOptions) -> Self {
        Self {
            inner: Arc::new(MutationInner {
                client,
                mutator,
                options,
                state: Mutex::new(MutationSnapshot::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> MutationSnapshot {
        self.state().clone()
    }

    pub fn reset(&self) {
        *self.state() = MutationSnapshot::default();
    }

    /// Runs the mutation and reports the outcome through the snapshot.
    pub async fn mutate(&self, variables: Value) -> MutationSnapshot {
        let _ = self.try_mutate(variables).await;
        self.snapshot()
    }

    /// Runs the mutation and returns its data, or the normalized error.
    pub async fn try_mutate(&self, variables: Value) -> std::result::Result<Value, FetchError> {
        {
            let mut state = self.state();
            state.loading = true;
            state.error = None;
        }
        let options = &self.inner.options;
        let optimistic = self.inner.client.optimistic();

        let update_id = match &options.optimistic {
            Some(transform) => match optimistic.apply(&transform.key, |prev| (transform.updater)(prev, &variables)) {
                Ok(id) => Some(id),
                Err(e) => return Err(self.fail(FetchError::from(e), None, &variables)),
            },
            None => None,
        };

        let outcome = (self.inner.mutator)(variables.clone())
            .await
            .and_then(|value| unwrap_response(value, ErrorKind::Mutation));

        match outcome {
            Ok(data) => {
                self.inner
                    .client
                    .invalidate(&options.invalidate_keys, &options.invalidate_patterns);
                if let Some(id) = &update_id {
                    optimistic.commit(id);
                }
                if let Some(f) = &options.on_success {
                    f(&data, &variables);
                }
                {
                    let mut state = self.state();
                    state.data = Some(data.clone());
                    state.loading = false;
                }
                if let Some(f) = &options.on_settled {
                    f(Some(&data), None, &variables);
                }
                Ok(data)
            }
            Err(e) => Err(self.fail(FetchError::from(e), update_id, &variables)),
        }
    }

    fn fail(&self, err: FetchError, update_id: Option<String>, variables: &Value) -> FetchError {
        debug!("Mutation failed: {}", err);
        if let Some(id) = update_id {
            self.inner.client.optimistic().revert(&id);
        }
        let options = &self.inner.options;
        if let Some(f) = &options.on_error {
            f(&err, variables);
        }
        {
            let mut state = self.state();
            state.error = Some(err.clone());
            state.loading = false;
        }
        if let Some(f) = &options.on_settled {
            f(None, Some(&err), variables);
        }
        err
    }

    fn state(&self) -> MutexGuard<'_, MutationSnapshot> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ReadCache, DEFAULT_TTL};
    use crate::engine::Envelope;
    use crate::fetch::mutator;
    use crate::Error;
    use serde_json::json;

    fn client() -> FetchClient {
        FetchClient::new(Arc::new(ReadCache::new()))
    }

    fn bump_qty(prev: Option<Value>, _vars: &Value) -> Result<Value> {
        let qty = prev.as_ref().and_then(|v| v["qty"].as_i64()).unwrap_or(0);
        let mut next = prev.unwrap_or_else(|| json!({}));
        next["qty"] = json!(qty + 1);
        Ok(next)
    }

    #[tokio::test]
    async fn test_success_invalidates_patterns_only() {
        let client = client();
        for key in ["orders:list:all", "orders:list:page:3", "orders:detail:42"] {
            client.cache().set(key, json!([]), DEFAULT_TTL);
        }
        let m = client.mutation(
            mutator(|vars| async move { Ok::<_, Error>(Value::from(Envelope::ok(vars))) }),
            MutationOptions::new().invalidate_pattern("orders:list:*"),
        );

        let data = m.try_mutate(json!({"status": "delivered"})).await.unwrap();
        assert_eq!(data, json!({"status": "delivered"}));
        assert_eq!(client.cache().keys(), vec!["orders:detail:42"]);
        assert_eq!(m.snapshot().data, Some(data));
    }

    #[tokio::test]
    async fn test_optimistic_commit_on_success() {
        let client = client();
        let m = client.mutation(
            mutator(|_| async { Ok::<_, Error>(json!({"ok": true})) }),
            MutationOptions::new().optimistic("cart:1", bump_qty),
        );

        m.try_mutate(json!({})).await.unwrap();
        assert_eq!(client.cache().get("cart:1"), Some(json!({"qty": 1})));
        assert!(client.optimistic().pending().is_empty());
    }

    #[tokio::test]
    async fn test_optimistic_revert_on_failed_envelope() {
        let client = client();
        client.cache().set("cart:1", json!({"qty": 2}), DEFAULT_TTL);
        let m = client.mutation(
            mutator(|_| async { Ok::<_, Error>(Value::from(Envelope::err("out of stock"))) }),
            MutationOptions::new()
                .optimistic("cart:1", bump_qty)
                .invalidate_key("cart:1"),
        );

        let err = m.try_mutate(json!({})).await.unwrap_err();
        assert!(err.is_mutation());
        assert_eq!(err.message, "out of stock");
        // failed mutations never invalidate
        assert_eq!(client.cache().get("cart:1"), Some(json!({"qty": 2})));
        assert!(client.optimistic().pending().is_empty());
        assert_eq!(m.snapshot().error.unwrap().message, "out of stock");
    }

    #[tokio::test]
    async fn test_optimistic_revert_on_error_clears_absent_key() {
        let client = client();
        let m = client.mutation(
            mutator(|_| async { Err::<Value, _>(Error::with_code("backend unreachable", "E_NET")) }),
            MutationOptions::new().optimistic("cart:9", bump_qty),
        );

        let snap = m.mutate(json!({})).await;
        let err = snap.error.unwrap();
        assert_eq!(err.kind, ErrorKind::Unexpected);
        assert_eq!(err.code.as_deref(), Some("E_NET"));
        assert!(!snap.loading);
        assert_eq!(client.cache().get("cart:9"), None);
    }

    #[tokio::test]
    async fn test_callbacks_run_in_order() {
        let client = client();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        let m = client.mutation(
            mutator(|vars| async move {
                if vars["fail"] == json!(true) {
                    Err(Error::Mutation("rejected".to_string()))
                } else {
                    Ok(json!("done"))
                }
            }),
            MutationOptions::new()
                .on_success(move |data, _| a.lock().unwrap().push(format!("success:{}", data)))
                .on_error(move |err, _| b.lock().unwrap().push(format!("error:{}", err)))
                .on_settled(move |data, err, _| {
                    c.lock().unwrap().push(format!("settled:{}:{}", data.is_some(), err.is_some()))
                }),
        );

        m.mutate(json!({"fail": false})).await;
        m.mutate(json!({"fail": true})).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "success:\"done\"".to_string(),
                "settled:true:false".to_string(),
                "error:rejected".to_string(),
                "settled:false:true".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_updater_skips_mutation() {
        let client = client();
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let m = client.mutation(
            mutator(move |_| {
                *flag.lock().unwrap() = true;
                async { Ok::<_, Error>(json!(null)) }
            }),
            MutationOptions::new().optimistic("k", |_, _| Err(Error::Internal("bad input".to_string()))),
        );

        let err = m.try_mutate(json!({})).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unexpected);
        assert!(!*called.lock().unwrap());
        assert!(!client.cache().contains_key("k"));
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let client = client();
        let m = client.mutation(
            mutator(|_| async { Err::<Value, _>(Error::Mutation("nope".to_string())) }),
            MutationOptions::new(),
        );
        m.mutate(json!(null)).await;
        assert!(m.snapshot().error.is_some());
        m.reset();
        assert!(m.snapshot().error.is_none());
    }
}
