//! In-memory query cache.
//!
//! A [`QueryDescriptor`] names a piece of remote state by [`QueryKey`] and
//! says how to fetch it. [`QueryClient`] serves reads from the
//! [`CacheStore`], starts at most one fetch per key when an entry is
//! missing or stale, and keeps subscribed keys fresh in the background.
//! [`ActivationGate`] withholds queries that need a session, a particular
//! list mode or a parent result. Invalidation, dependent queries and the
//! refresh coordinator are layered on top.

mod binder;
mod client;
mod descriptor;
mod entry;
mod error;
mod gate;
mod invalidation;
mod key;
mod refresh;
mod retry;
mod state;
mod store;

pub use binder::{normalize_sequence, DependentQuery, ResponseShape};
pub use client::{ErrorReporter, QueryClient, Subscription};
pub use descriptor::{FetchResult, QueryDescriptor, DEFAULT_STALE_TIME};
pub use entry::{CacheEntry, QueryStatus};
pub use error::QueryError;
pub use gate::{ActivationGate, Gate, ListMode, ModeSelector};
pub use key::{KeyPart, QueryKey};
pub use refresh::RefreshCoordinator;
pub use retry::{RetryPolicy, DEFAULT_RETRY_COUNT};
pub use state::QueryState;
pub use store::CacheStore;
