use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use super::QueryError;
use crate::utils::format_age;

/// Lifecycle status of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum QueryStatus {
    /// Never fetched, or withheld by its gate.
    #[default]
    Idle,
    /// First fetch in flight, no data yet.
    Loading,
    Success,
    Error,
    /// Fetch in flight while previous data stays visible.
    Refetching,
}

impl QueryStatus {
    pub fn is_fetching(&self) -> bool {
        matches!(self, QueryStatus::Loading | QueryStatus::Refetching)
    }
}

/// One resolved key in the cache.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    /// Last successful result. Kept through refetches and failures.
    pub data: Option<Value>,
    pub status: QueryStatus,
    /// Last failure, cleared when a new attempt starts.
    pub error: Option<QueryError>,
    pub fetched_at: Option<Instant>,
    pub stale_at: Option<Instant>,
    /// Wall-clock time of the last success, for display.
    pub updated_at: Option<DateTime<Utc>>,
    /// Set by invalidation; forces the next evaluation to refetch.
    pub invalidated: bool,
    /// Entry belongs to the current session and goes away with it.
    pub session_scoped: bool,
}

impl CacheEntry {
    pub fn is_stale(&self, now: Instant) -> bool {
        self.invalidated || self.stale_at.map_or(true, |at| now >= at)
    }

    /// Whether an active read at `now` should start a fetch.
    ///
    /// Failed entries wait for an explicit trigger instead of retrying
    /// on every read.
    pub fn needs_fetch(&self, now: Instant) -> bool {
        match self.status {
            QueryStatus::Idle => true,
            QueryStatus::Loading | QueryStatus::Refetching => false,
            QueryStatus::Success => self.is_stale(now),
            QueryStatus::Error => self.invalidated,
        }
    }

    /// When the entry next needs attention from a background refresher.
    pub fn refresh_deadline(&self) -> Option<Instant> {
        if self.status.is_fetching() {
            return None;
        }
        if self.invalidated {
            return Some(Instant::now());
        }
        match self.status {
            // A zero window means "stale on every read", not "refetch forever".
            QueryStatus::Success => self.stale_at.filter(|at| Some(*at) > self.fetched_at),
            _ => None,
        }
    }

    pub(crate) fn begin_fetch(&mut self, session_scoped: bool) {
        self.status = if self.data.is_some() {
            QueryStatus::Refetching
        } else {
            QueryStatus::Loading
        };
        self.error = None;
        self.invalidated = false;
        self.session_scoped = session_scoped;
    }

    pub(crate) fn resolve(&mut self, data: Value, stale_time: Duration) {
        let now = Instant::now();
        self.data = Some(data);
        self.status = QueryStatus::Success;
        self.error = None;
        self.fetched_at = Some(now);
        self.stale_at = Some(now + stale_time);
        self.updated_at = Some(Utc::now());
    }

    pub(crate) fn reject(&mut self, error: QueryError) {
        self.status = QueryStatus::Error;
        self.error = Some(error);
    }

    pub fn age_display(&self) -> String {
        match self.updated_at {
            Some(at) => format_age(at, Utc::now()),
            None => "never".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FIVE_MINUTES: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn test_resolved_entry_goes_stale() {
        let mut entry = CacheEntry::default();
        entry.begin_fetch(false);
        assert_eq!(entry.status, QueryStatus::Loading);

        entry.resolve(json!([1, 2, 3]), FIVE_MINUTES);
        assert_eq!(entry.status, QueryStatus::Success);
        assert!(!entry.needs_fetch(Instant::now()));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(entry.is_stale(Instant::now()));
        assert!(entry.needs_fetch(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_keeps_data_visible() {
        let mut entry = CacheEntry::default();
        entry.begin_fetch(false);
        entry.resolve(json!(["a"]), FIVE_MINUTES);

        entry.begin_fetch(false);
        assert_eq!(entry.status, QueryStatus::Refetching);
        assert_eq!(entry.data, Some(json!(["a"])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retains_previous_data() {
        let mut entry = CacheEntry::default();
        entry.begin_fetch(false);
        entry.resolve(json!({"id": 1}), FIVE_MINUTES);
        entry.begin_fetch(false);
        entry.reject(QueryError::transport(Some(500), "boom"));

        assert_eq!(entry.status, QueryStatus::Error);
        assert_eq!(entry.data, Some(json!({"id": 1})));
        assert!(entry.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_waits_for_explicit_trigger() {
        let mut entry = CacheEntry::default();
        entry.begin_fetch(false);
        entry.reject(QueryError::Unauthorized);
        assert!(!entry.needs_fetch(Instant::now()));

        entry.invalidated = true;
        assert!(entry.needs_fetch(Instant::now()));

        entry.begin_fetch(false);
        assert!(entry.error.is_none());
        assert!(!entry.invalidated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_deadline() {
        let mut entry = CacheEntry::default();
        entry.begin_fetch(false);
        assert!(entry.refresh_deadline().is_none());

        entry.resolve(json!([]), FIVE_MINUTES);
        assert_eq!(entry.refresh_deadline(), Some(Instant::now() + FIVE_MINUTES));

        entry.resolve(json!([]), Duration::ZERO);
        assert!(entry.needs_fetch(Instant::now()));
        assert!(entry.refresh_deadline().is_none());

        entry.invalidated = true;
        assert_eq!(entry.refresh_deadline(), Some(Instant::now()));
    }

    #[test]
    fn test_age_display_never() {
        assert_eq!(CacheEntry::default().age_display(), "never");
    }
}
