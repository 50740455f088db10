use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{CacheEntry, QueryError, QueryStatus};
use crate::utils::format_age;

/// Read-only view of one query, as handed to the UI.
///
/// `is_fetching` covers every fetch; `is_loading` only the first one,
/// before any data exists. Screens show a full spinner for the latter and
/// a light indicator for background refreshes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryState {
    pub data: Option<Value>,
    pub status: QueryStatus,
    pub error: Option<QueryError>,
    pub is_loading: bool,
    pub is_fetching: bool,
    pub is_error: bool,
    /// False when a gate withholds the query. Disabled states never carry data.
    pub is_enabled: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl QueryState {
    pub(crate) fn disabled() -> Self {
        Self::default()
    }

    pub(crate) fn from_entry(entry: Option<&CacheEntry>) -> Self {
        let Some(entry) = entry else {
            return Self {
                is_enabled: true,
                ..Self::default()
            };
        };
        Self {
            data: entry.data.clone(),
            status: entry.status,
            error: entry.error.clone(),
            is_loading: entry.status == QueryStatus::Loading,
            is_fetching: entry.status.is_fetching(),
            is_error: entry.status == QueryStatus::Error,
            is_enabled: true,
            updated_at: entry.updated_at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    /// Deserialize the cached data into a model type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.data
            .as_ref()
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
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
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_disabled_state() {
        let state = QueryState::disabled();
        assert!(!state.is_enabled);
        assert!(state.data.is_none());
        assert_eq!(state.status, QueryStatus::Idle);
    }

    #[test]
    fn test_loading_vs_fetching() {
        let mut entry = CacheEntry::default();
        entry.begin_fetch(false);
        let first = QueryState::from_entry(Some(&entry));
        assert!(first.is_loading);
        assert!(first.is_fetching);

        entry.resolve(json!([1]), Duration::from_secs(60));
        entry.begin_fetch(false);
        let again = QueryState::from_entry(Some(&entry));
        assert!(!again.is_loading);
        assert!(again.is_fetching);
        assert_eq!(again.data, Some(json!([1])));
    }

    #[test]
    fn test_error_without_data() {
        let mut entry = CacheEntry::default();
        entry.begin_fetch(false);
        entry.reject(QueryError::transport(Some(500), "boom"));
        let state = QueryState::from_entry(Some(&entry));
        assert!(state.is_error);
        assert!(!state.is_loading);
        assert!(state.data.is_none());
    }

    #[test]
    fn test_data_as() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Item {
            id: i64,
        }
        let state = QueryState {
            data: Some(json!([{"id": 1}, {"id": 2}])),
            ..Default::default()
        };
        let items: Option<Vec<Item>> = state.data_as().unwrap();
        assert_eq!(items, Some(vec![Item { id: 1 }, Item { id: 2 }]));
        assert_eq!(QueryState::default().data_as::<Vec<Item>>().unwrap(), None);
    }
}
