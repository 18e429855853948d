//! Injectable query cache.
//!
//! Holds every cached read plus the registry of in-flight fetches. Reads are
//! public; every write is crate-private so only coordinators mutate it. The
//! lock is never held across an `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;

use emis_core::ApiError;

use crate::entity;
use crate::key::{CacheKey, Scope};

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>, ApiError>>>;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<Value>,
    stale: bool,
    fetched_at: Instant,
    /// Id of the fetch that produced the value; a later-started fetch wins.
    fetch_id: u64,
}

struct InflightFetch {
    id: u64,
    fetch: SharedFetch,
}

/// An entity removed from cached lists by a delete that has not settled.
#[derive(Debug)]
struct PendingRemoval {
    token: u64,
    namespace: String,
    entity: String,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    inflight: HashMap<CacheKey, InflightFetch>,
    removals: Vec<PendingRemoval>,
    /// Bumped on every invalidation, per namespace.
    epochs: HashMap<String, u64>,
    /// Bumped by `clear`; fetches started before a clear are discarded.
    generation: u64,
    /// Source of fetch ids and removal tokens.
    sequence: u64,
}

impl CacheState {
    fn epoch(&self, namespace: &str) -> u64 {
        self.epochs.get(namespace).copied().unwrap_or(0)
    }

    fn bump_epoch(&mut self, namespace: &str) {
        *self.epochs.entry(namespace.to_string()).or_insert(0) += 1;
    }

    fn next_id(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Forget in-flight fetches for `[namespace, scope, *]` so the next read
    /// starts a new request. The detached fetches still settle for their
    /// own callers.
    fn detach(&mut self, namespace: &str, scope: Scope) -> usize {
        let before = self.inflight.len();
        self.inflight.retain(|k, _| !k.in_family(namespace, scope));
        before - self.inflight.len()
    }

    /// Apply every pending removal of `namespace` to a freshly fetched list.
    fn without_pending(&self, namespace: &str, mut collection: Value) -> Value {
        for removal in self.removals.iter().filter(|r| r.namespace == namespace) {
            if let Some(pruned) = entity::without_entity(&collection, &removal.entity) {
                collection = pruned;
            }
        }
        collection
    }
}

/// Pre-mutation values of the list entries a delete touched.
///
/// While a snapshot is outstanding its entity is kept out of every list
/// result that lands in the cache. Hand it back through `restore` or
/// `release`.
#[derive(Debug)]
pub struct Snapshot {
    entries: Vec<(CacheKey, CacheEntry)>,
    generation: u64,
    token: u64,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A cached value as seen by readers.
#[derive(Debug, Clone)]
pub struct Cached {
    pub value: Arc<Value>,
    pub stale: bool,
}

pub struct QueryCache {
    state: Mutex<CacheState>,
    stale_time: Option<Duration>,
}

impl QueryCache {
    /// Entries go stale only through invalidation.
    pub fn new() -> Self {
        Self::with_stale_time(None)
    }

    /// Entries also go stale once older than `stale_time`.
    pub fn with_stale_time(stale_time: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            stale_time,
        }
    }

    fn is_stale(&self, entry: &CacheEntry) -> bool {
        entry.stale
            || self
                .stale_time
                .is_some_and(|ttl| entry.fetched_at.elapsed() >= ttl)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Cached> {
        let state = self.state.lock();
        state.entries.get(key).map(|entry| Cached {
            value: Arc::clone(&entry.value),
            stale: self.is_stale(entry),
        })
    }

    /// The cached value if present and not stale.
    pub fn fresh(&self, key: &CacheKey) -> Option<Arc<Value>> {
        self.get(key)
            .filter(|cached| !cached.stale)
            .map(|cached| cached.value)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.state.lock().inflight.contains_key(key)
    }

    /// Join the in-flight fetch for `key`, or start one with `fetch`.
    ///
    /// The result is written back only if no `clear` happened meanwhile and
    /// no later-started fetch already stored its result. If the namespace
    /// was invalidated meanwhile the entry is stored stale.
    pub(crate) fn fetch_shared<F, Fut>(
        self: &Arc<Self>,
        key: &CacheKey,
        fetch: F,
    ) -> SharedFetch
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let mut state = self.state.lock();
        if let Some(existing) = state.inflight.get(key) {
            tracing::debug!("Joining in-flight fetch for {}", key);
            return existing.fetch.clone();
        }

        let id = state.next_id();
        let generation = state.generation;
        let epoch = state.epoch(key.namespace());
        let cache = Arc::clone(self);
        let owned_key = key.clone();
        let request = fetch();

        let shared = async move {
            let result = request.await;
            cache.complete_fetch(&owned_key, id, generation, epoch, result)
        }
        .boxed()
        .shared();

        tracing::debug!("Fetching {}", key);
        state.inflight.insert(
            key.clone(),
            InflightFetch {
                id,
                fetch: shared.clone(),
            },
        );
        shared
    }

    fn complete_fetch(
        &self,
        key: &CacheKey,
        fetch_id: u64,
        generation: u64,
        epoch: u64,
        result: Result<Value, ApiError>,
    ) -> Result<Arc<Value>, ApiError> {
        let mut state = self.state.lock();
        if state.inflight.get(key).is_some_and(|f| f.id == fetch_id) {
            state.inflight.remove(key);
        }

        let value = result?;

        if state.generation != generation {
            tracing::debug!("Discarding late result for {}", key);
            return Ok(Arc::new(value));
        }
        if state.entries.get(key).is_some_and(|e| e.fetch_id > fetch_id) {
            tracing::debug!("Newer result already cached for {}", key);
            return Ok(Arc::new(value));
        }

        let value = match key.scope() {
            Scope::List => Arc::new(state.without_pending(key.namespace(), value)),
            Scope::Detail => Arc::new(value),
        };
        let stale = state.epoch(key.namespace()) != epoch;
        if stale {
            tracing::debug!("{} was invalidated while fetching", key);
        }
        state.entries.insert(
            key.clone(),
            CacheEntry {
                value: Arc::clone(&value),
                stale,
                fetched_at: Instant::now(),
                fetch_id,
            },
        );
        Ok(value)
    }

    /// Mark every `[namespace, scope, *]` entry stale and detach their
    /// in-flight fetches.
    pub(crate) fn invalidate_family(&self, namespace: &str, scope: Scope) -> usize {
        let mut state = self.state.lock();
        state.bump_epoch(namespace);
        let detached = state.detach(namespace, scope);
        let mut count = 0;
        for (_, entry) in state
            .entries
            .iter_mut()
            .filter(|(k, _)| k.in_family(namespace, scope))
        {
            entry.stale = true;
            count += 1;
        }
        tracing::debug!(
            "Invalidated {} [{}, {}, *] entries, detached {} fetches",
            count,
            namespace,
            scope.as_str(),
            detached
        );
        count
    }

    pub(crate) fn invalidate(&self, key: &CacheKey) {
        let mut state = self.state.lock();
        state.bump_epoch(key.namespace());
        state.inflight.remove(key);
        if let Some(entry) = state.entries.get_mut(key) {
            entry.stale = true;
            tracing::debug!("Invalidated {}", key);
        }
    }

    /// Snapshot every `[namespace, list, *]` entry, then drop the entity
    /// `id` from each, as one step. Until the snapshot is handed back, list
    /// fetches that land are stored stale and without the entity.
    pub(crate) fn remove_from_lists(&self, namespace: &str, id: &str) -> Snapshot {
        let mut state = self.state.lock();
        state.bump_epoch(namespace);
        state.detach(namespace, Scope::List);

        let generation = state.generation;
        let token = state.next_id();
        state.removals.push(PendingRemoval {
            token,
            namespace: namespace.to_string(),
            entity: id.to_string(),
        });

        let mut snapshot = Vec::new();
        for (key, entry) in state
            .entries
            .iter_mut()
            .filter(|(k, _)| k.in_family(namespace, Scope::List))
        {
            snapshot.push((key.clone(), entry.clone()));
            if let Some(pruned) = entity::without_entity(&entry.value, id) {
                entry.value = Arc::new(pruned);
            }
        }

        tracing::debug!(
            "Optimistically removed {} from {} {} lists",
            id,
            snapshot.len(),
            namespace
        );
        Snapshot {
            entries: snapshot,
            generation,
            token,
        }
    }

    /// Put every snapshotted entry back exactly as it was.
    pub(crate) fn restore(&self, snapshot: Snapshot) {
        let mut state = self.state.lock();
        state.removals.retain(|r| r.token != snapshot.token);
        if state.generation != snapshot.generation {
            tracing::debug!("Cache cleared since snapshot; skipping rollback");
            return;
        }
        let restored = snapshot.entries.len();
        for (key, entry) in snapshot.entries {
            state.entries.insert(key, entry);
        }
        tracing::debug!("Restored {} list entries", restored);
    }

    /// Drop a snapshot whose delete went through.
    pub(crate) fn release(&self, snapshot: Snapshot) {
        self.state
            .lock()
            .removals
            .retain(|r| r.token != snapshot.token);
    }

    /// Drop every entry and forget in-flight fetches.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.inflight.clear();
        state.generation += 1;
        tracing::info!("Query cache cleared");
    }

    /// Drop every entry of one namespace.
    pub(crate) fn remove_namespace(&self, namespace: &str) {
        let mut state = self.state.lock();
        state.entries.retain(|k, _| k.namespace() != namespace);
        state.inflight.retain(|k, _| k.namespace() != namespace);
        state.bump_epoch(namespace);
    }

    #[cfg(test)]
    pub(crate) fn insert(&self, key: CacheKey, value: Value) -> Arc<Value> {
        let value = Arc::new(value);
        self.state.lock().entries.insert(
            key,
            CacheEntry {
                value: Arc::clone(&value),
                stale: false,
                fetched_at: Instant::now(),
                fetch_id: 0,
            },
        );
        value
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("QueryCache")
            .field("entries", &state.entries.len())
            .field("inflight", &state.inflight.len())
            .field("generation", &state.generation)
            .finish()
    }
}
