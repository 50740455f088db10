//! Query lifecycle: evaluation, deduplicated fetching and subscriptions.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::{
    invalidation, ActivationGate, CacheEntry, CacheStore, QueryDescriptor, QueryError, QueryKey,
    QueryState,
};

/// Buffer size for the change-notification channel.
/// Receivers that fall further behind treat the lag as "something changed".
const CHANGE_CHANNEL_CAPACITY: usize = 256;

type InFlight = Shared<BoxFuture<'static, ()>>;

/// Callback for unexpected fetch failures.
pub type ErrorReporter = Arc<dyn Fn(&QueryKey, &QueryError) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A fetch in flight for one key.
pub(crate) struct Pending {
    done: InFlight,
    pub(crate) session_scoped: bool,
}

pub(crate) struct Table {
    pub(crate) store: CacheStore,
    pub(crate) in_flight: HashMap<QueryKey, Pending>,
    /// Bumped on every login, logout or token swap. Session-scoped results
    /// fetched under an older value are dropped.
    pub(crate) session_epoch: u64,
}

struct Observer {
    descriptor: QueryDescriptor,
    count: usize,
    refresher: JoinHandle<()>,
}

pub(crate) struct Inner {
    pub(crate) table: Mutex<Table>,
    observers: Mutex<HashMap<QueryKey, Observer>>,
    gate: ActivationGate,
    changes: broadcast::Sender<QueryKey>,
    reporter: RwLock<Option<ErrorReporter>>,
    runtime: Handle,
}

/// In-memory query cache shared by every screen.
///
/// All transitions of an entry happen under one table lock, so two
/// completions for the same key can never interleave. Fetches themselves
/// run as tasks on the runtime the client was created on.
///
/// Cloning is cheap - clones share the same cache.
#[derive(Clone)]
pub struct QueryClient {
    pub(crate) inner: Arc<Inner>,
}

impl QueryClient {
    /// Create a client bound to the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn new(gate: ActivationGate) -> Self {
        Self::with_runtime(gate, Handle::current())
    }

    pub fn with_runtime(gate: ActivationGate, runtime: Handle) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let token = gate.auth().token();
        let session = gate.auth().subscribe();
        let modes = gate.modes().subscribe();
        let inner = Arc::new(Inner {
            table: Mutex::new(Table {
                store: CacheStore::new(),
                in_flight: HashMap::new(),
                session_epoch: 0,
            }),
            observers: Mutex::new(HashMap::new()),
            gate,
            changes,
            reporter: RwLock::new(None),
            runtime: runtime.clone(),
        });
        runtime.spawn(invalidation::watch_activation(
            Arc::downgrade(&inner),
            token,
            session,
            modes,
        ));
        Self { inner }
    }

    pub fn gate(&self) -> &ActivationGate {
        &self.inner.gate
    }

    /// Route unexpected fetch failures to `reporter` in addition to the log.
    /// Expected outcomes such as an expired session are never reported.
    pub fn set_error_reporter<F>(&self, reporter: F)
    where
        F: Fn(&QueryKey, &QueryError) + Send + Sync + 'static,
    {
        let mut slot = self
            .inner
            .reporter
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(reporter));
    }

    /// Read a query. Starts a fetch when the query is active and its entry
    /// is absent or stale; never waits for it.
    pub fn read(&self, descriptor: &QueryDescriptor) -> QueryState {
        self.inner.evaluate(descriptor).0
    }

    /// Read a query without starting anything.
    pub fn peek(&self, descriptor: &QueryDescriptor) -> QueryState {
        self.inner.snapshot(descriptor)
    }

    /// Force a new fetch for this key, regardless of staleness.
    /// A fetch already in flight is reused; the entry stays marked stale
    /// so one more fetch follows it.
    pub fn refetch(&self, descriptor: &QueryDescriptor) -> QueryState {
        {
            let mut table = lock(&self.inner.table);
            if let Some(entry) = table.store.get_mut(descriptor.key()) {
                entry.invalidated = true;
            }
        }
        self.read(descriptor)
    }

    /// Read a query and wait for any fetch it starts or joins.
    pub async fn fetch(&self, descriptor: &QueryDescriptor) -> QueryState {
        let state = self.read(descriptor);
        if !state.is_enabled {
            return state;
        }
        self.settled(descriptor.key()).await;
        self.peek(descriptor)
    }

    /// Wait until no fetch is in flight for `key`.
    pub async fn settled(&self, key: &QueryKey) {
        let pending = lock(&self.inner.table)
            .in_flight
            .get(key)
            .map(|p| p.done.clone());
        if let Some(pending) = pending {
            pending.await;
        }
    }

    /// Register live interest in a query.
    ///
    /// While at least one subscription exists the key is refetched in the
    /// background whenever it goes stale or is invalidated.
    pub fn subscribe(&self, descriptor: &QueryDescriptor) -> Subscription {
        let changes = self.inner.changes.subscribe();
        self.inner.retain(descriptor);
        self.read(descriptor);
        Subscription {
            client: self.clone(),
            descriptor: descriptor.clone(),
            changes,
        }
    }

    /// Copy of the raw entry for `key`, ignoring gates.
    pub fn entry(&self, key: &QueryKey) -> Option<CacheEntry> {
        lock(&self.inner.table).store.get(key).cloned()
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        lock(&self.inner.table).in_flight.contains_key(key)
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        lock(&self.inner.observers)
            .get(key)
            .map(|o| o.count)
            .unwrap_or(0)
    }

    /// Notifications carrying the key of every entry that changed.
    pub fn changes(&self) -> broadcast::Receiver<QueryKey> {
        self.inner.changes.subscribe()
    }
}

impl Inner {
    /// Evaluate gates and staleness for one read. Returns the state and
    /// whether this read started a fetch.
    pub(crate) fn evaluate(self: &Arc<Self>, descriptor: &QueryDescriptor) -> (QueryState, bool) {
        let key = descriptor.key();
        let mut table = lock(&self.table);
        if !self.gate.is_active(descriptor, &table.store) {
            return (QueryState::disabled(), false);
        }

        let in_flight = table.in_flight.contains_key(key);
        let should_fetch = !in_flight
            && table
                .store
                .get(key)
                .map_or(true, |entry| entry.needs_fetch(Instant::now()));
        if should_fetch {
            self.start_fetch(&mut table, descriptor);
        } else if in_flight && table.store.get(key).is_none() {
            // Removed while its fetch runs: attach to that fetch
            let mut entry = CacheEntry::default();
            entry.begin_fetch(descriptor.is_session_scoped());
            table.store.set(key.clone(), entry);
        }
        let state = QueryState::from_entry(table.store.get(key));
        drop(table);

        if should_fetch {
            self.notify(key);
        }
        (state, should_fetch)
    }

    fn snapshot(&self, descriptor: &QueryDescriptor) -> QueryState {
        let table = lock(&self.table);
        if !self.gate.is_active(descriptor, &table.store) {
            return QueryState::disabled();
        }
        QueryState::from_entry(table.store.get(descriptor.key()))
    }

    fn start_fetch(self: &Arc<Self>, table: &mut Table, descriptor: &QueryDescriptor) {
        let key = descriptor.key().clone();
        let mut entry = table.store.get(&key).cloned().unwrap_or_default();
        entry.begin_fetch(descriptor.is_session_scoped());
        debug!(key = %key, status = ?entry.status, "Fetch started");
        table.store.set(key.clone(), entry);

        let inner = Arc::clone(self);
        let session_scoped = descriptor.is_session_scoped();
        let descriptor = descriptor.clone();
        let epoch = table.session_epoch;
        let handle = self
            .runtime
            .spawn(async move { inner.run_fetch(descriptor, epoch).await });
        // The table lock is held until the handle is registered, so the task
        // cannot finish and deregister before this insert.
        let done = async move {
            let _ = handle.await;
        }
        .boxed()
        .shared();
        table.in_flight.insert(
            key,
            Pending {
                done,
                session_scoped,
            },
        );
    }

    async fn run_fetch(self: Arc<Self>, descriptor: QueryDescriptor, epoch: u64) {
        let key = descriptor.key().clone();
        let policy = descriptor.retry_policy();
        let mut attempt = 0;

        let outcome = loop {
            let result = match AssertUnwindSafe(descriptor.fetch()).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(QueryError::transport(None, "fetch task panicked")),
            };
            match result {
                Ok(data) => break Ok(data),
                Err(err) => match policy.backoff(attempt, &err) {
                    Some(delay) => {
                        attempt += 1;
                        warn!(
                            key = %key,
                            retry = attempt,
                            backoff_ms = delay.as_millis() as u64,
                            error = %err,
                            "Fetch failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => break Err(err),
                },
            }
        };

        {
            let mut table = lock(&self.table);
            if descriptor.is_session_scoped() && table.session_epoch != epoch {
                // Fetched for a session that has ended. Its in-flight slot was
                // already released by the session change.
                debug!(key = %key, "Dropping result from a previous session");
                return;
            }
            // The entry may have been evicted meanwhile; the result is kept anyway
            let mut entry = table.store.get(&key).cloned().unwrap_or_default();
            entry.session_scoped = descriptor.is_session_scoped();
            match outcome {
                Ok(data) => {
                    debug!(key = %key, "Fetch succeeded");
                    entry.resolve(data, descriptor.staleness());
                }
                Err(err) => {
                    self.report_failure(&key, &err);
                    entry.reject(err);
                }
            }
            table.store.set(key.clone(), entry);
            table.in_flight.remove(&key);
        }
        self.notify(&key);
    }

    fn report_failure(&self, key: &QueryKey, err: &QueryError) {
        if err.is_expected() {
            debug!(key = %key, error = %err, "Fetch rejected by session");
            return;
        }
        error!(key = %key, error = %err, "Fetch failed");
        let reporter = self
            .reporter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(reporter) = reporter {
            reporter(key, err);
        }
    }

    pub(crate) fn notify(&self, key: &QueryKey) {
        // No receivers is fine
        let _ = self.changes.send(key.clone());
    }

    pub(crate) fn observed(&self, key: &QueryKey) -> Option<QueryDescriptor> {
        lock(&self.observers)
            .get(key)
            .filter(|o| o.count > 0)
            .map(|o| o.descriptor.clone())
    }

    pub(crate) fn observed_descriptors(&self) -> Vec<QueryDescriptor> {
        lock(&self.observers)
            .values()
            .map(|o| o.descriptor.clone())
            .collect()
    }

    fn retain(self: &Arc<Self>, descriptor: &QueryDescriptor) {
        let mut observers = lock(&self.observers);
        let observer = observers
            .entry(descriptor.key().clone())
            .or_insert_with(|| Observer {
                descriptor: descriptor.clone(),
                count: 0,
                refresher: self
                    .runtime
                    .spawn(refresh_while_observed(Arc::clone(self), descriptor.clone())),
            });
        observer.count += 1;
    }

    fn release(&self, key: &QueryKey) {
        let mut observers = lock(&self.observers);
        if let Some(observer) = observers.get_mut(key) {
            observer.count = observer.count.saturating_sub(1);
            if observer.count == 0 {
                if let Some(observer) = observers.remove(key) {
                    observer.refresher.abort();
                    debug!(key = %key, "Last subscriber gone");
                }
            }
        }
    }
}

/// Wait for a change notification about `key`.
pub(crate) async fn wait_for_key(changes: &mut broadcast::Receiver<QueryKey>, key: &QueryKey) {
    loop {
        match changes.recv().await {
            Ok(changed) if &changed == key => return,
            Ok(_) => continue,
            Err(RecvError::Lagged(_)) | Err(RecvError::Closed) => return,
        }
    }
}

/// Background refresh for one observed key: refetch when the entry goes
/// stale or gets invalidated, for as long as somebody is subscribed.
async fn refresh_while_observed(inner: Arc<Inner>, descriptor: QueryDescriptor) {
    let key = descriptor.key().clone();
    let mut changes = inner.changes.subscribe();
    loop {
        let deadline = lock(&inner.table)
            .store
            .get(&key)
            .and_then(|entry| entry.refresh_deadline());

        match deadline {
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {
                        let (_, started) = inner.evaluate(&descriptor);
                        if !started {
                            // Gated off or already handled; wait for the next transition
                            wait_for_key(&mut changes, &key).await;
                        }
                    }
                    _ = wait_for_key(&mut changes, &key) => {}
                }
            }
            None => wait_for_key(&mut changes, &key).await,
        }
    }
}

/// Live interest in one query. Dropping it releases the interest.
pub struct Subscription {
    client: QueryClient,
    descriptor: QueryDescriptor,
    changes: broadcast::Receiver<QueryKey>,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        self.descriptor.key()
    }

    /// Current state; starts a fetch if the entry needs one.
    pub fn state(&self) -> QueryState {
        self.client.read(&self.descriptor)
    }

    /// Wait for the next change to this key, then read it.
    pub async fn changed(&mut self) -> QueryState {
        wait_for_key(&mut self.changes, self.descriptor.key()).await;
        self.state()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.client.inner.release(self.descriptor.key());
    }
}
