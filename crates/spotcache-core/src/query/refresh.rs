use std::sync::Arc;

use tracing::info;

use super::{ListMode, QueryClient, QueryKey};

type PartitionMap = Arc<dyn Fn(ListMode) -> Option<QueryKey> + Send + Sync>;

/// Routes a pull-to-refresh to the list partition the caller is showing.
///
/// Only the selected partition's key is invalidated; the other keeps its
/// entry and timestamps untouched.
#[derive(Clone)]
pub struct RefreshCoordinator {
    client: QueryClient,
    partitions: PartitionMap,
}

impl RefreshCoordinator {
    /// `partitions` maps a mode to its list key. It may return `None`,
    /// e.g. for favourites while logged out.
    pub fn new<F>(client: QueryClient, partitions: F) -> Self
    where
        F: Fn(ListMode) -> Option<QueryKey> + Send + Sync + 'static,
    {
        Self {
            client,
            partitions: Arc::new(partitions),
        }
    }

    pub fn key_for(&self, mode: ListMode) -> Option<QueryKey> {
        (self.partitions)(mode)
    }

    /// Invalidate the partition for `mode`. Returns the key that was targeted.
    pub fn refresh(&self, mode: ListMode) -> Option<QueryKey> {
        let key = self.key_for(mode)?;
        let started = self.client.invalidate(&key);
        info!(mode = %mode, key = %key, started, "Refresh requested");
        Some(key)
    }

    /// Refresh whichever partition is currently selected.
    pub fn refresh_current(&self) -> Option<QueryKey> {
        self.refresh(self.client.gate().modes().current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthProvider;
    use crate::query::{ActivationGate, Gate, ModeSelector, QueryDescriptor};
    use serde_json::json;

    fn list(key: &str, mode: ListMode) -> QueryDescriptor {
        QueryDescriptor::new(QueryKey::new(key), || async { Ok(json!([1, 2, 3])) })
            .gate(Gate::Mode(mode))
    }

    fn coordinator(client: &QueryClient) -> RefreshCoordinator {
        RefreshCoordinator::new(client.clone(), |mode| match mode {
            ListMode::Popular => Some(QueryKey::new("spots").with("popular")),
            ListMode::Favourites => Some(QueryKey::new("favourites")),
        })
    }

    #[tokio::test]
    async fn test_refresh_touches_only_the_selected_partition() {
        let modes = ModeSelector::default();
        let client = QueryClient::new(ActivationGate::new(AuthProvider::default(), modes.clone()));
        let popular = QueryDescriptor::new(QueryKey::new("spots").with("popular"), || async {
            Ok(json!([1]))
        })
        .gate(Gate::Mode(ListMode::Popular));
        let favourites = list("favourites", ListMode::Favourites);

        client.fetch(&popular).await;
        modes.select(ListMode::Favourites);
        client.fetch(&favourites).await;
        let popular_fetched_at = client.entry(popular.key()).unwrap().fetched_at;

        let refresh = coordinator(&client);
        assert_eq!(refresh.refresh(ListMode::Favourites), Some(favourites.key().clone()));

        let popular_entry = client.entry(popular.key()).unwrap();
        assert_eq!(popular_entry.fetched_at, popular_fetched_at);
        assert!(!popular_entry.invalidated);
        assert!(client.entry(favourites.key()).unwrap().invalidated);
    }

    #[tokio::test]
    async fn test_refresh_current_follows_selection() {
        let modes = ModeSelector::new(ListMode::Favourites);
        let client = QueryClient::new(ActivationGate::new(AuthProvider::default(), modes));
        let refresh = coordinator(&client);
        assert_eq!(refresh.refresh_current(), Some(QueryKey::new("favourites")));
        assert_eq!(refresh.key_for(ListMode::Popular), Some(QueryKey::new("spots").with("popular")));
    }

    #[tokio::test]
    async fn test_unmapped_mode_is_noop() {
        let client = QueryClient::new(ActivationGate::new(AuthProvider::default(), ModeSelector::default()));
        let refresh = RefreshCoordinator::new(client, |_| None);
        assert_eq!(refresh.refresh(ListMode::Popular), None);
    }
}
