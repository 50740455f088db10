//! The app's remote state, declared as queries.
//!
//! - the popular and favourites spot lists, one per list mode
//! - the logged-in user's profile, keyed on the session token
//! - that user's reviews, keyed on the id projected out of the profile

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::api::SpotApi;
use crate::auth::AuthProvider;
use crate::config::Config;
use crate::models::{Profile, Review, Spot};
use crate::query::{
    normalize_sequence, DependentQuery, Gate, KeyPart, ListMode, QueryClient, QueryDescriptor,
    QueryError, QueryKey, QueryState, RefreshCoordinator, RetryPolicy, DEFAULT_STALE_TIME,
};

pub fn popular_key() -> QueryKey {
    QueryKey::new("spots").with(ListMode::Popular.as_str())
}

pub fn favourites_key(token: &str) -> QueryKey {
    QueryKey::new("favourites").with(token)
}

pub fn profile_key(token: &str) -> QueryKey {
    QueryKey::new("userProfile").with(token)
}

pub fn reviews_key(user_id: KeyPart) -> QueryKey {
    QueryKey::new("userReviews").with(user_id)
}

fn as_list(value: Value) -> Value {
    Value::Array(normalize_sequence(value))
}

fn path_segment(part: &KeyPart) -> String {
    match part {
        KeyPart::Str(s) => s.clone(),
        KeyPart::Int(i) => i.to_string(),
        KeyPart::Bool(b) => b.to_string(),
    }
}

fn decode<T: DeserializeOwned>(state: &QueryState, what: &str) -> Vec<T> {
    match state.data_as::<Vec<T>>() {
        Ok(items) => items.unwrap_or_default(),
        Err(e) => {
            debug!(error = %e, what = what, "Cached list did not decode");
            Vec::new()
        }
    }
}

/// Query declarations for every screen, bound to one cache and one API.
#[derive(Clone)]
pub struct SpotData {
    client: QueryClient,
    api: Arc<dyn SpotApi>,
    list_stale: Duration,
    profile_stale: Duration,
    coordinator: RefreshCoordinator,
}

impl SpotData {
    pub fn new(client: QueryClient, api: Arc<dyn SpotApi>) -> Self {
        let auth = client.gate().auth().clone();
        let coordinator = RefreshCoordinator::new(client.clone(), move |mode| match mode {
            ListMode::Popular => Some(popular_key()),
            ListMode::Favourites => auth.token().map(|token| favourites_key(&token)),
        });
        Self {
            client,
            api,
            list_stale: DEFAULT_STALE_TIME,
            profile_stale: DEFAULT_STALE_TIME,
            coordinator,
        }
    }

    pub fn from_config(client: QueryClient, api: Arc<dyn SpotApi>, config: &Config) -> Self {
        Self::new(client, api).with_stale_times(config.list_stale_time(), config.profile_stale_time())
    }

    pub fn with_stale_times(mut self, list: Duration, profile: Duration) -> Self {
        self.list_stale = list;
        self.profile_stale = profile;
        self
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    pub fn auth(&self) -> &AuthProvider {
        self.client.gate().auth()
    }

    pub fn mode(&self) -> ListMode {
        self.client.gate().modes().current()
    }

    /// Switch the visible list. The other list's entry is kept.
    pub fn select_mode(&self, mode: ListMode) -> bool {
        self.client.gate().modes().select(mode)
    }

    // ===== Declarations =====

    pub fn popular_query(&self) -> QueryDescriptor {
        let api = Arc::clone(&self.api);
        QueryDescriptor::new(popular_key(), move || {
            let fut = api.popular_spots();
            async move { fut.await.map_err(QueryError::from) }
        })
        .gate(Gate::Mode(ListMode::Popular))
        .stale_time(self.list_stale)
        .map_data(as_list)
    }

    /// `None` while logged out.
    pub fn favourites_query(&self) -> Option<QueryDescriptor> {
        let token = self.auth().token()?;
        let api = Arc::clone(&self.api);
        let fetch_token = token.clone();
        let descriptor = QueryDescriptor::new(favourites_key(&token), move || {
            let fut = api.favourites(&fetch_token);
            async move { fut.await.map_err(QueryError::from) }
        })
        .gate(Gate::SessionToken(token))
        .gate(Gate::Mode(ListMode::Favourites))
        .stale_time(self.list_stale)
        .map_data(as_list);
        Some(descriptor)
    }

    pub fn list_query(&self, mode: ListMode) -> Option<QueryDescriptor> {
        match mode {
            ListMode::Popular => Some(self.popular_query()),
            ListMode::Favourites => self.favourites_query(),
        }
    }

    /// `None` while logged out. A failed profile fetch is never retried
    /// automatically; a new token or an explicit refetch tries again.
    pub fn profile_query(&self) -> Option<QueryDescriptor> {
        let token = self.auth().token()?;
        let api = Arc::clone(&self.api);
        let fetch_token = token.clone();
        let descriptor = QueryDescriptor::new(profile_key(&token), move || {
            let fut = api.profile(&fetch_token);
            async move { fut.await.map_err(QueryError::from) }
        })
        .gate(Gate::SessionToken(token))
        .stale_time(self.profile_stale)
        .retry(RetryPolicy::Disabled);
        Some(descriptor)
    }

    /// `None` while logged out.
    pub fn reviews_query(&self) -> Option<DependentQuery> {
        let parent = self.profile_query()?;
        let token = self.auth().token()?;
        let api = Arc::clone(&self.api);
        let stale = self.list_stale;
        Some(DependentQuery::new(parent, Profile::id_from_json, move |user_id| {
            let api = Arc::clone(&api);
            let fetch_token = token.clone();
            let segment = path_segment(&user_id);
            QueryDescriptor::new(reviews_key(user_id), move || {
                let fut = api.user_reviews(&fetch_token, &segment);
                async move { fut.await.map_err(QueryError::from) }
            })
            .gate(Gate::SessionToken(token.clone()))
            .stale_time(stale)
        }))
    }

    // ===== Reads =====

    /// The list for the selected mode.
    pub fn spots(&self) -> QueryState {
        match self.list_query(self.mode()) {
            Some(query) => self.client.read(&query),
            None => QueryState::default(),
        }
    }

    pub fn spot_items(&self) -> Vec<Spot> {
        decode(&self.spots(), "spots")
    }

    pub fn profile(&self) -> QueryState {
        match self.profile_query() {
            Some(query) => self.client.read(&query),
            None => QueryState::default(),
        }
    }

    pub fn profile_model(&self) -> Option<Profile> {
        match self.profile().data_as::<Profile>() {
            Ok(profile) => profile,
            Err(e) => {
                debug!(error = %e, "Profile did not decode");
                None
            }
        }
    }

    /// The user's reviews. Reads the profile too, so the chain starts by
    /// itself.
    pub fn reviews(&self) -> QueryState {
        let Some(query) = self.reviews_query() else {
            return QueryState::default();
        };
        self.client.read(query.parent());
        query.read(&self.client)
    }

    pub fn review_items(&self) -> Vec<Review> {
        decode(&self.reviews(), "reviews")
    }

    // ===== Actions =====

    /// Refresh the list for `mode`, and only that list.
    pub fn refresh(&self, mode: ListMode) -> Option<QueryKey> {
        self.coordinator.refresh(mode)
    }

    pub fn refresh_current(&self) -> Option<QueryKey> {
        self.coordinator.refresh_current()
    }

    pub fn refetch_profile(&self) -> QueryState {
        match self.profile_query() {
            Some(query) => self.client.refetch(&query),
            None => QueryState::default(),
        }
    }

    // ===== Awaited loads, for callers without a render loop =====

    pub async fn load_spots(&self) -> QueryState {
        match self.list_query(self.mode()) {
            Some(query) => self.client.fetch(&query).await,
            None => QueryState::default(),
        }
    }

    pub async fn load_profile(&self) -> QueryState {
        match self.profile_query() {
            Some(query) => self.client.fetch(&query).await,
            None => QueryState::default(),
        }
    }

    pub async fn load_reviews(&self) -> QueryState {
        match self.reviews_query() {
            Some(query) => query.fetch(&self.client).await,
            None => QueryState::default(),
        }
    }
}
