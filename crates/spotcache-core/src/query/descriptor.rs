use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::{Gate, QueryError, QueryKey, RetryPolicy};

/// Staleness window used when a descriptor does not set one.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

pub type FetchResult = Result<Value, QueryError>;

type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, FetchResult> + Send + Sync>;

/// Static definition of one query: its key, how to fetch it, when it may
/// run and how long its result stays fresh.
///
/// Cloning is cheap; the fetch closure is shared.
#[derive(Clone)]
pub struct QueryDescriptor {
    key: QueryKey,
    fetcher: Fetcher,
    gates: Vec<Gate>,
    stale_time: Duration,
    retry: RetryPolicy,
}

impl QueryDescriptor {
    pub fn new<F, Fut>(key: QueryKey, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        Self {
            key,
            fetcher: Arc::new(move || fetch().boxed()),
            gates: Vec::new(),
            stale_time: DEFAULT_STALE_TIME,
            retry: RetryPolicy::Disabled,
        }
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn retry(mut self, retry: impl Into<RetryPolicy>) -> Self {
        self.retry = retry.into();
        self
    }

    pub fn gate(mut self, gate: Gate) -> Self {
        self.gates.push(gate);
        self
    }

    /// Post-process every successful fetch result before it is cached.
    pub fn map_data<M>(mut self, map: M) -> Self
    where
        M: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.fetcher);
        let map = Arc::new(map);
        self.fetcher = Arc::new(move || {
            let fut = inner();
            let map = Arc::clone(&map);
            async move { fut.await.map(|value| map(value)) }.boxed()
        });
        self
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    pub fn staleness(&self) -> Duration {
        self.stale_time
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Entries of session-gated queries belong to the current session.
    pub fn is_session_scoped(&self) -> bool {
        self.gates
            .iter()
            .any(|g| matches!(g, Gate::Session | Gate::SessionToken(_)))
    }

    pub(crate) fn fetch(&self) -> BoxFuture<'static, FetchResult> {
        (self.fetcher)()
    }
}

impl fmt::Debug for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDescriptor")
            .field("key", &self.key)
            .field("gates", &self.gates)
            .field("stale_time", &self.stale_time)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_builder_defaults() {
        let d = QueryDescriptor::new(QueryKey::new("spots"), || async { Ok(json!([])) });
        assert_eq!(d.staleness(), DEFAULT_STALE_TIME);
        assert_eq!(d.retry_policy(), RetryPolicy::Disabled);
        assert!(d.gates().is_empty());
        assert!(!d.is_session_scoped());
        assert_eq!(d.fetch().await, Ok(json!([])));
    }

    #[test]
    fn test_session_scope_follows_gate() {
        let d = QueryDescriptor::new(QueryKey::new("userProfile"), || async { Ok(json!({})) })
            .gate(Gate::Session)
            .retry(false);
        assert!(d.is_session_scoped());
    }

    #[tokio::test]
    async fn test_map_data_applies_to_success_only() {
        let ok = QueryDescriptor::new(QueryKey::new("a"), || async { Ok(json!({"data": [1]})) })
            .map_data(|v| v["data"].clone());
        assert_eq!(ok.fetch().await, Ok(json!([1])));

        let failing = QueryDescriptor::new(QueryKey::new("b"), || async {
            Err(QueryError::Unauthorized)
        })
        .map_data(|_| json!("never"));
        assert_eq!(failing.fetch().await, Err(QueryError::Unauthorized));
    }
}
