use std::collections::HashMap;

use super::{CacheEntry, QueryKey};

/// Keyed table of cache entries.
///
/// Pure storage: nothing here fetches, schedules or notifies.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: HashMap<QueryKey, CacheEntry>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &QueryKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &QueryKey) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    pub fn set(&mut self, key: QueryKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &QueryKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Keys whose entries satisfy `predicate`.
    pub fn keys_where(&self, predicate: impl Fn(&QueryKey, &CacheEntry) -> bool) -> Vec<QueryKey> {
        self.entries
            .iter()
            .filter(|(key, entry)| predicate(key, entry))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
