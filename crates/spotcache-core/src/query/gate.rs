use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::{CacheStore, QueryDescriptor, QueryKey, QueryStatus};
use crate::auth::AuthProvider;

/// The list partitions the spot screen can show. Exactly one is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ListMode {
    Popular,
    Favourites,
}

impl ListMode {
    pub const ALL: [ListMode; 2] = [ListMode::Popular, ListMode::Favourites];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListMode::Popular => "popular",
            ListMode::Favourites => "favourites",
        }
    }
}

impl fmt::Display for ListMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "popular" => Ok(ListMode::Popular),
            "favourites" | "favorites" => Ok(ListMode::Favourites),
            other => Err(format!("Unknown list mode: {}", other)),
        }
    }
}

/// Currently selected list partition, with change notification.
#[derive(Clone)]
pub struct ModeSelector {
    tx: Arc<watch::Sender<ListMode>>,
}

impl ModeSelector {
    pub fn new(initial: ListMode) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> ListMode {
        *self.tx.borrow()
    }

    /// Switch partitions. Returns whether the selection changed.
    pub fn select(&self, mode: ListMode) -> bool {
        self.tx.send_if_modified(|current| {
            let changed = *current != mode;
            *current = mode;
            changed
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ListMode> {
        self.tx.subscribe()
    }
}

impl Default for ModeSelector {
    fn default() -> Self {
        Self::new(ListMode::Popular)
    }
}

/// One activation condition. A descriptor is active when all of its gates pass.
#[derive(Clone)]
pub enum Gate {
    /// Requires a non-empty session token.
    Session,
    /// Requires this exact token to be the current one. Used by queries
    /// keyed on the token, so an entry fetched for one identity is never
    /// served under another.
    SessionToken(String),
    /// Requires this list partition to be the selected one.
    Mode(ListMode),
    /// Requires the parent entry to be in `Success`.
    Parent(QueryKey),
    /// Arbitrary predicate, evaluated on every read.
    When(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Session => write!(f, "Session"),
            Gate::SessionToken(_) => write!(f, "SessionToken(..)"),
            Gate::Mode(mode) => write!(f, "Mode({})", mode),
            Gate::Parent(key) => write!(f, "Parent({})", key),
            Gate::When(_) => write!(f, "When(..)"),
        }
    }
}

/// Evaluates descriptor gates against the session, the selected mode and
/// the cache itself.
#[derive(Clone)]
pub struct ActivationGate {
    auth: AuthProvider,
    modes: ModeSelector,
}

impl ActivationGate {
    pub fn new(auth: AuthProvider, modes: ModeSelector) -> Self {
        Self { auth, modes }
    }

    pub fn auth(&self) -> &AuthProvider {
        &self.auth
    }

    pub fn modes(&self) -> &ModeSelector {
        &self.modes
    }

    pub fn is_active(&self, descriptor: &QueryDescriptor, store: &CacheStore) -> bool {
        descriptor.gates().iter().all(|gate| self.check(gate, store))
    }

    fn check(&self, gate: &Gate, store: &CacheStore) -> bool {
        match gate {
            Gate::Session => self.auth.is_authenticated(),
            Gate::SessionToken(token) => self.auth.token().as_deref() == Some(token.as_str()),
            Gate::Mode(mode) => self.modes.current() == *mode,
            Gate::Parent(key) => store
                .get(key)
                .map(|e| e.status == QueryStatus::Success && e.data.is_some())
                .unwrap_or(false),
            Gate::When(predicate) => predicate(),
        }
    }
}
