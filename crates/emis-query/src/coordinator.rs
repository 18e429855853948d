//! Per-resource query/mutation coordinator.
//!
//! One generic factory for every resource: the API module supplies the
//! namespace and label, the coordinator supplies cache keys, read
//! de-duplication, invalidation and the optimistic delete.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use emis_core::ApiError;
use emis_services::{EntityApi, Filters, ResourceDescriptor};

use crate::cache::{QueryCache, Snapshot};
use crate::error::QueryError;
use crate::key::{CacheKey, Scope};
use crate::mutation::{InFlight, MutationKind, MutationOutcome, MutationState};
use crate::notify::{Notification, Notifier};

/// Result of a detail read.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState {
    /// No id yet; nothing was fetched.
    NotLoaded,
    Loaded(Arc<Value>),
}

impl QueryState {
    pub fn value(&self) -> Option<&Arc<Value>> {
        match self {
            QueryState::NotLoaded => None,
            QueryState::Loaded(value) => Some(value),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, QueryState::Loaded(_))
    }
}

#[derive(Clone)]
pub struct Coordinator {
    descriptor: ResourceDescriptor,
    api: Arc<dyn EntityApi>,
    cache: Arc<QueryCache>,
    notifier: Arc<dyn Notifier>,
    pending: Arc<AtomicUsize>,
}

impl Coordinator {
    pub fn new(
        api: Arc<dyn EntityApi>,
        cache: Arc<QueryCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            descriptor: *api.descriptor(),
            api,
            cache,
            notifier,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn namespace(&self) -> &'static str {
        self.descriptor.namespace
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn list_key(&self, filters: &Filters) -> CacheKey {
        CacheKey::list(self.namespace(), filters)
    }

    pub fn detail_key(&self, id: &str) -> CacheKey {
        CacheKey::detail(self.namespace(), id)
    }

    /// `InFlight` while any mutation issued through this coordinator is
    /// outstanding, `Idle` otherwise.
    pub fn mutation_state(&self) -> MutationState {
        if self.pending.load(Ordering::SeqCst) > 0 {
            MutationState::InFlight
        } else {
            MutationState::Idle
        }
    }

    pub fn is_mutating(&self) -> bool {
        self.mutation_state() == MutationState::InFlight
    }

    /// Collection read for `filters`. Served from cache when fresh; joins an
    /// identical outstanding fetch instead of issuing a second one.
    #[instrument(skip(self), fields(ns = self.descriptor.namespace))]
    pub async fn list(&self, filters: &Filters) -> Result<Arc<Value>, QueryError> {
        let key = self.list_key(filters);
        if let Some(value) = self.cache.fresh(&key) {
            tracing::debug!("Cache hit for {}", key);
            return Ok(value);
        }

        let api = Arc::clone(&self.api);
        let filters = filters.clone();
        self.cache
            .fetch_shared(&key, move || async move { api.get_all(&filters).await })
            .await
            .map_err(|e| {
                tracing::warn!("Failed to load {}: {}", key, e);
                QueryError::new(key, e)
            })
    }

    /// Single-entity read. An empty id is not an error: nothing is fetched
    /// and the state is `NotLoaded`.
    #[instrument(skip(self), fields(ns = self.descriptor.namespace))]
    pub async fn detail(&self, id: &str) -> Result<QueryState, QueryError> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(QueryState::NotLoaded);
        }

        let key = self.detail_key(id);
        if let Some(value) = self.cache.fresh(&key) {
            tracing::debug!("Cache hit for {}", key);
            return Ok(QueryState::Loaded(value));
        }

        let api = Arc::clone(&self.api);
        let owned_id = id.to_string();
        self.cache
            .fetch_shared(&key, move || async move { api.get_by_id(&owned_id).await })
            .await
            .map(QueryState::Loaded)
            .map_err(|e| {
                tracing::warn!("Failed to load {}: {}", key, e);
                QueryError::new(key, e)
            })
    }

    /// Create, then mark every list of this resource stale. The new entity's
    /// position is left for the server to decide on the next read.
    #[instrument(skip(self, data), fields(ns = self.descriptor.namespace))]
    pub async fn create(&self, data: &Value) -> MutationOutcome {
        let mutation = self.begin(MutationKind::Create, None);

        match self.api.create(data).await {
            Ok(value) => {
                self.cache.invalidate_family(self.namespace(), Scope::List);
                self.notify_success(MutationKind::Create);
                mutation.succeed(value)
            }
            Err(e) => self.settle_error(mutation, e),
        }
    }

    /// Update, then mark the entity's detail and every list stale.
    #[instrument(skip(self, data), fields(ns = self.descriptor.namespace))]
    pub async fn update(&self, id: &str, data: &Value) -> MutationOutcome {
        let mutation = self.begin(MutationKind::Update, None);
        if let Err(e) = self.require_id(id) {
            return self.settle_error(mutation, e);
        }
        let id = id.trim();

        match self.api.update(id, data).await {
            Ok(value) => {
                self.cache.invalidate(&self.detail_key(id));
                self.cache.invalidate_family(self.namespace(), Scope::List);
                self.notify_success(MutationKind::Update);
                mutation.succeed(value)
            }
            Err(e) => self.settle_error(mutation, e),
        }
    }

    /// Optimistic delete.
    ///
    /// The entity leaves every cached list before the request is sent. On
    /// failure each list is restored to the exact value it held when the
    /// delete started; on success the lists and the detail entry are
    /// invalidated so the next read reconciles with the server.
    #[instrument(skip(self), fields(ns = self.descriptor.namespace))]
    pub async fn delete(&self, id: &str) -> MutationOutcome {
        if let Err(e) = self.require_id(id) {
            let mutation = self.begin(MutationKind::Delete, None);
            return self.settle_error(mutation, e);
        }
        let id = id.trim();

        let snapshot = self.cache.remove_from_lists(self.namespace(), id);
        let mutation = self.begin(MutationKind::Delete, Some(snapshot));

        match self.api.delete(id).await {
            Ok(value) => {
                self.cache.invalidate_family(self.namespace(), Scope::List);
                self.cache.invalidate(&self.detail_key(id));
                self.notify_success(MutationKind::Delete);
                mutation.succeed(value)
            }
            Err(e) => self.settle_error(mutation, e),
        }
    }

    /// Mark every cached read of this resource stale.
    pub fn refresh(&self) {
        self.cache.invalidate_family(self.namespace(), Scope::List);
        self.cache.invalidate_family(self.namespace(), Scope::Detail);
    }

    /// Evict every cached read of this resource.
    pub fn reset(&self) {
        self.cache.remove_namespace(self.namespace());
    }

    fn begin(&self, kind: MutationKind, snapshot: Option<Snapshot>) -> InFlight {
        tracing::debug!("{} {} started", self.descriptor.label, kind.verb());
        InFlight::start(
            kind,
            self.namespace(),
            snapshot,
            Arc::clone(&self.cache),
            Arc::clone(&self.pending),
        )
    }

    fn require_id(&self, id: &str) -> Result<(), ApiError> {
        if id.trim().is_empty() {
            return Err(ApiError::Validation {
                status: 400,
                message: Some(format!("{} id is required", self.descriptor.label)),
            });
        }
        Ok(())
    }

    fn settle_error(&self, mutation: InFlight, error: ApiError) -> MutationOutcome {
        let (outcome, snapshot) = mutation.fail(error);
        if let Some(snapshot) = snapshot {
            tracing::warn!(
                "Rolling back {} {} list entries",
                snapshot.len(),
                self.namespace()
            );
            self.cache.restore(snapshot);
        }
        if let Some(e) = outcome.error() {
            tracing::warn!(
                "{} {} failed: {}",
                self.descriptor.label,
                outcome.kind.verb(),
                e
            );
            self.notifier
                .notify(Notification::error(self.error_message(outcome.kind, e)));
        }
        outcome
    }

    fn notify_success(&self, kind: MutationKind) {
        self.notifier.notify(Notification::success(format!(
            "{} {} successfully",
            self.descriptor.label,
            kind.past_tense()
        )));
    }

    fn error_message(&self, kind: MutationKind, error: &ApiError) -> String {
        match error.server_message() {
            Some(message) => message.to_string(),
            None => format!(
                "Failed to {} {}. {}",
                kind.verb(),
                self.descriptor.label.to_lowercase(),
                error.user_message()
            ),
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("namespace", &self.descriptor.namespace)
            .field("pending", &self.pending.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::notify::{ChannelNotifier, NotificationKind};
    use async_trait::async_trait;
    use emis_services::catalog;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Scripted API: returns the queued response for each verb.
    struct ScriptedApi {
        delete_result: Mutex<Option<Result<Value, ApiError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn deleting(result: Result<Value, ApiError>) -> Self {
            Self {
                delete_result: Mutex::new(Some(result)),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EntityApi for ScriptedApi {
        fn descriptor(&self) -> &ResourceDescriptor {
            &catalog::CALENDARS
        }

        async fn get_all(&self, _filters: &Filters) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!([]))
        }

        async fn get_by_id(&self, id: &str) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "id": id }))
        }

        async fn create(&self, data: &Value) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(data.clone())
        }

        async fn update(&self, _id: &str, data: &Value) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(data.clone())
        }

        async fn delete(&self, _id: &str) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.delete_result.lock().take().unwrap_or(Ok(Value::Null))
        }
    }

    fn coordinator(
        api: Arc<ScriptedApi>,
    ) -> (Coordinator, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        let (notifier, rx) = ChannelNotifier::new();
        let coordinator = Coordinator::new(api, Arc::new(QueryCache::new()), Arc::new(notifier));
        (coordinator, rx)
    }

    #[tokio::test]
    async fn test_delete_failure_generic_message() {
        let api = Arc::new(ScriptedApi::deleting(Err(ApiError::from_status(500, None))));
        let (coordinator, mut rx) = coordinator(api);

        let outcome = coordinator.delete("3").await;
        assert_eq!(outcome.state, MutationState::SettledError);

        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.kind, NotificationKind::Error);
        assert!(notification.message.starts_with("Failed to delete calendar."));
    }

    #[tokio::test]
    async fn test_delete_success_invalidates_detail() {
        let api = Arc::new(ScriptedApi::deleting(Ok(Value::Null)));
        let (coordinator, mut rx) = coordinator(Arc::clone(&api));

        coordinator.detail("3").await.unwrap();
        let outcome = coordinator.delete("3").await;

        assert!(outcome.is_success());
        assert!(coordinator.cache().get(&coordinator.detail_key("3")).unwrap().stale);
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::success("Calendar deleted successfully")
        );
        assert!(!coordinator.is_mutating());
    }

    #[tokio::test]
    async fn test_empty_id_mutations_stay_local() {
        let api = Arc::new(ScriptedApi::deleting(Ok(Value::Null)));
        let (coordinator, mut rx) = coordinator(Arc::clone(&api));

        let outcome = coordinator.update("", &json!({"name": "x"})).await;
        assert_eq!(outcome.state, MutationState::SettledError);
        let outcome = coordinator.delete("  ").await;
        assert_eq!(outcome.state, MutationState::SettledError);

        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert_eq!(rx.try_recv().unwrap().message, "Calendar id is required");
    }

    #[tokio::test]
    async fn test_detail_cache_hit() {
        let api = Arc::new(ScriptedApi::deleting(Ok(Value::Null)));
        let (coordinator, _rx) = coordinator(Arc::clone(&api));

        let first = coordinator.detail("9").await.unwrap();
        let second = coordinator.detail("9").await.unwrap();

        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(first.value().unwrap(), second.value().unwrap()));
    }

    #[tokio::test]
    async fn test_refresh_and_reset() {
        let api = Arc::new(ScriptedApi::deleting(Ok(Value::Null)));
        let (coordinator, _rx) = coordinator(Arc::clone(&api));

        coordinator.list(&Filters::new()).await.unwrap();
        coordinator.refresh();
        assert!(coordinator.cache().fresh(&coordinator.list_key(&Filters::new())).is_none());

        coordinator.reset();
        assert!(coordinator.cache().is_empty());
    }
}
