//! Invalidation: marking entries stale on demand and on session transitions.

use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tracing::{debug, info};

use super::client::{lock, Inner};
use super::{CacheEntry, ListMode, QueryClient, QueryKey};
use crate::auth::SessionData;

impl QueryClient {
    /// Mark `key` stale now. If anyone is subscribed to it the refetch
    /// starts immediately; otherwise the next read picks it up.
    /// Cached data stays visible either way.
    ///
    /// Returns whether a fetch was started.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let known = {
            let mut table = lock(&self.inner.table);
            match table.store.get_mut(key) {
                Some(entry) => {
                    entry.invalidated = true;
                    true
                }
                None => false,
            }
        };
        let observed = self.inner.observed(key);
        if !known && observed.is_none() {
            return false;
        }
        debug!(key = %key, subscribed = observed.is_some(), "Invalidated");

        let started = observed
            .map(|descriptor| self.inner.evaluate(&descriptor).1)
            .unwrap_or(false);
        if !started {
            self.inner.notify(key);
        }
        started
    }

    /// Invalidate every entry whose key satisfies `predicate`.
    /// Returns the number of entries marked.
    pub fn invalidate_where(&self, predicate: impl Fn(&QueryKey) -> bool) -> usize {
        let keys = lock(&self.inner.table)
            .store
            .keys_where(|key, _| predicate(key));
        for key in &keys {
            self.invalidate(key);
        }
        keys.len()
    }

    /// Invalidate a whole key family, e.g. every `("favourites", ..)` entry.
    pub fn invalidate_prefix(&self, prefix: &QueryKey) -> usize {
        self.invalidate_where(|key| key.starts_with(prefix))
    }

    /// Drop an entry entirely. A fetch in flight for it still completes
    /// and writes its result.
    pub fn remove(&self, key: &QueryKey) -> Option<CacheEntry> {
        let removed = lock(&self.inner.table).store.remove(key);
        if removed.is_some() {
            debug!(key = %key, "Entry removed");
            self.inner.notify(key);
        }
        removed
    }
}

impl Inner {
    /// React to login, logout or a token swap.
    ///
    /// Every session-scoped entry is evicted and fetches still running for
    /// the old session are detached, so nothing cached under one identity
    /// is ever served under another. Observed queries reload from scratch.
    fn session_changed(self: &Arc<Self>, logged_in: bool) {
        let keys = {
            let mut table = lock(&self.table);
            table.session_epoch += 1;
            let mut keys = table.store.keys_where(|_, entry| entry.session_scoped);
            for key in &keys {
                table.store.remove(key);
            }
            table.in_flight.retain(|key, pending| {
                if pending.session_scoped && !keys.contains(key) {
                    keys.push(key.clone());
                }
                !pending.session_scoped
            });
            keys
        };
        info!(entries = keys.len(), logged_in, "Session changed");
        for key in &keys {
            self.notify(key);
        }
        self.reevaluate_observed();
    }

    /// Re-run every observed query after a gate input changed, and tell
    /// subscribers to re-read.
    fn reevaluate_observed(self: &Arc<Self>) {
        for descriptor in self.observed_descriptors() {
            let (_, started) = self.evaluate(&descriptor);
            if !started {
                self.notify(descriptor.key());
            }
        }
    }
}

fn current_token(session: &watch::Receiver<Option<SessionData>>) -> Option<String> {
    session
        .borrow()
        .as_ref()
        .map(|d| d.token.clone())
        .filter(|t| !t.is_empty())
}

/// Follow the auth provider and the mode selector for the lifetime of the
/// client.
pub(crate) async fn watch_activation(
    inner: Weak<Inner>,
    mut token: Option<String>,
    mut session: watch::Receiver<Option<SessionData>>,
    mut modes: watch::Receiver<ListMode>,
) {
    loop {
        tokio::select! {
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = current_token(&session);
                if next == token {
                    continue;
                }
                let Some(inner) = inner.upgrade() else { break };
                token = next;
                inner.session_changed(token.is_some());
            }
            changed = modes.changed() => {
                if changed.is_err() {
                    break;
                }
                let mode = *modes.borrow_and_update();
                let Some(inner) = inner.upgrade() else { break };
                debug!(mode = %mode, "List mode changed");
                inner.reevaluate_observed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthProvider;
    use crate::query::{ActivationGate, Gate, ModeSelector, QueryDescriptor, QueryStatus};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn counting(key: QueryKey, calls: &Arc<AtomicUsize>) -> QueryDescriptor {
        let calls = Arc::clone(calls);
        QueryDescriptor::new(key, move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!([n])) }
        })
    }

    async fn settle_watchers() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_invalidate_without_subscribers_defers_refetch() {
        let client = QueryClient::new(ActivationGate::new(AuthProvider::default(), ModeSelector::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let d = counting(QueryKey::new("spots"), &calls);
        client.fetch(&d).await;

        assert!(!client.invalidate(d.key()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Data survives invalidation
        assert_eq!(client.entry(d.key()).and_then(|e| e.data), Some(json!([0])));

        let state = client.read(&d);
        assert_eq!(state.status, QueryStatus::Refetching);
        assert_eq!(state.data, Some(json!([0])));
        client.settled(d.key()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_with_subscriber_refetches_immediately() {
        let client = QueryClient::new(ActivationGate::new(AuthProvider::default(), ModeSelector::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let d = counting(QueryKey::new("spots"), &calls);
        let _sub = client.subscribe(&d);
        client.settled(d.key()).await;

        assert!(client.invalidate(d.key()));
        assert!(client.is_fetching(d.key()));
        client.settled(d.key()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_key_is_noop() {
        let client = QueryClient::new(ActivationGate::new(AuthProvider::default(), ModeSelector::default()));
        assert!(!client.invalidate(&QueryKey::new("nothing")));
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let client = QueryClient::new(ActivationGate::new(AuthProvider::default(), ModeSelector::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let a = counting(QueryKey::new("reviews").with(1), &calls);
        let b = counting(QueryKey::new("reviews").with(2), &calls);
        let other = counting(QueryKey::new("spots"), &calls);
        client.fetch(&a).await;
        client.fetch(&b).await;
        client.fetch(&other).await;

        assert_eq!(client.invalidate_prefix(&QueryKey::new("reviews")), 2);
        assert!(client.entry(a.key()).unwrap().invalidated);
        assert!(!client.entry(other.key()).unwrap().invalidated);
    }

    #[tokio::test]
    async fn test_remove_then_read_loads_again() {
        let client = QueryClient::new(ActivationGate::new(AuthProvider::default(), ModeSelector::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let d = counting(QueryKey::new("spots"), &calls);
        client.fetch(&d).await;

        assert!(client.remove(d.key()).is_some());
        assert!(client.entry(d.key()).is_none());
        assert_eq!(client.read(&d).status, QueryStatus::Loading);
    }

    #[tokio::test]
    async fn test_invalidation_during_fetch_triggers_one_follow_up() {
        let client = QueryClient::new(ActivationGate::new(AuthProvider::default(), ModeSelector::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let d = counting(QueryKey::new("spots"), &calls);

        client.read(&d);
        client.invalidate(d.key());
        client.settled(d.key()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The completed entry is still marked stale
        assert!(client.entry(d.key()).unwrap().invalidated);
        client.fetch(&d).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        client.fetch(&d).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_logout_evicts_session_entries() {
        let auth = AuthProvider::new(Some(SessionData::new("t1", "ana")));
        let client = QueryClient::new(ActivationGate::new(auth.clone(), ModeSelector::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let profile = counting(QueryKey::new("userProfile").with("t1"), &calls).gate(Gate::Session);
        let spots = counting(QueryKey::new("spots"), &calls);
        client.fetch(&profile).await;
        client.fetch(&spots).await;

        auth.logout();
        settle_watchers().await;

        assert!(client.entry(profile.key()).is_none());
        assert!(client.entry(spots.key()).is_some());
        let state = client.read(&profile);
        assert!(!state.is_enabled);
        assert!(state.data.is_none());
    }

    #[tokio::test]
    async fn test_login_invalidates_session_entries() {
        let auth = AuthProvider::new(Some(SessionData::new("t1", "ana")));
        let client = QueryClient::new(ActivationGate::new(auth.clone(), ModeSelector::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = counting(QueryKey::new("favouritesCount"), &calls)
            .gate(Gate::Session)
            .stale_time(Duration::from_secs(3600));
        client.fetch(&shared).await;

        auth.login(SessionData::new("t2", "bo"));
        settle_watchers().await;

        assert!(client.entry(shared.key()).is_none());
        client.fetch(&shared).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_token_swap_never_serves_previous_user() {
        let auth = AuthProvider::new(Some(SessionData::new("t1", "ana")));
        let client = QueryClient::new(ActivationGate::new(auth.clone(), ModeSelector::default()));
        let session = auth.clone();
        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);
        let stats = QueryDescriptor::new(QueryKey::new("myStats"), move || {
            let owner = session.current().map(|d| d.username).unwrap_or_default();
            let gate = Arc::clone(&gate);
            async move {
                if owner != "ana" {
                    gate.notified().await;
                }
                Ok(json!({ "owner": owner }))
            }
        })
        .gate(Gate::Session);
        client.fetch(&stats).await;

        auth.login(SessionData::new("t2", "bo"));
        settle_watchers().await;

        let state = client.read(&stats);
        assert_eq!(state.status, QueryStatus::Loading);
        assert!(state.data.is_none());

        release.notify_one();
        let state = client.fetch(&stats).await;
        assert_eq!(state.data, Some(json!({ "owner": "bo" })));
    }

    #[tokio::test]
    async fn test_result_from_ended_session_is_dropped() {
        let auth = AuthProvider::new(Some(SessionData::new("t1", "ana")));
        let client = QueryClient::new(ActivationGate::new(auth.clone(), ModeSelector::default()));
        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);
        let stats = QueryDescriptor::new(QueryKey::new("myStats"), move || {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok(json!({ "owner": "ana" }))
            }
        })
        .gate(Gate::Session);

        assert_eq!(client.read(&stats).status, QueryStatus::Loading);
        auth.logout();
        settle_watchers().await;
        assert!(!client.is_fetching(stats.key()));

        release.notify_one();
        settle_watchers().await;
        assert!(client.entry(stats.key()).is_none());
    }

    #[tokio::test]
    async fn test_read_after_remove_attaches_to_running_fetch() {
        let client = QueryClient::new(ActivationGate::new(AuthProvider::default(), ModeSelector::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);
        let d = QueryDescriptor::new(QueryKey::new("spots"), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok(json!(["done"]))
            }
        });

        client.read(&d);
        client.remove(d.key());
        let state = client.read(&d);
        assert_eq!(state.status, QueryStatus::Loading);
        assert!(state.is_fetching);
        assert!(client.is_fetching(d.key()));

        release.notify_one();
        let state = client.fetch(&d).await;
        assert_eq!(state.data, Some(json!(["done"])));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mode_switch_activates_observed_partition() {
        let modes = ModeSelector::default();
        let client = QueryClient::new(ActivationGate::new(AuthProvider::default(), modes.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let favourites = counting(QueryKey::new("favourites"), &calls)
            .gate(Gate::Mode(ListMode::Favourites));

        let _sub = client.subscribe(&favourites);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        modes.select(ListMode::Favourites);
        settle_watchers().await;
        client.settled(favourites.key()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.peek(&favourites).status, QueryStatus::Success);
    }
}
