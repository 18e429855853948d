//! The console's data layer: one HTTP client, one cache and one notifier,
//! with a coordinator for every catalog resource.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use emis_auth::{CredentialStore, FileCredentialStore, TokenSet};
use emis_core::{ApiError, AppError, Config};
use emis_services::catalog::{self, BULK_RESULTS_PATH};
use emis_services::{
    ApiClient, BatchOutcome, EntityApi, LoginRequest, MultipartUpload, ResourceApi,
    ResourceDescriptor, Session,
};

use crate::cache::QueryCache;
use crate::coordinator::Coordinator;
use crate::key::Scope;
use crate::notify::{Notification, Notifier};

#[derive(Clone)]
struct Resource {
    api: Arc<ResourceApi>,
    coordinator: Coordinator,
}

pub struct Console {
    client: ApiClient,
    session: Session,
    cache: Arc<QueryCache>,
    notifier: Arc<dyn Notifier>,
    calendars: Coordinator,
    categories: Coordinator,
    events: Coordinator,
    resources: HashMap<&'static str, Resource>,
}

impl Console {
    /// Build from loaded configuration, keeping the token under
    /// `<config_dir>/tokens/<auth.credential_service>.json`.
    pub fn from_config(config: &Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let credentials = FileCredentialStore::for_service(
            &config.config_dir,
            &config.auth.credential_service,
        );
        tracing::debug!("Using credential file {}", credentials.path().display());
        Self::with_credentials(config, Arc::new(credentials), notifier)
    }

    /// Build from loaded configuration with a caller-supplied credential store.
    pub fn with_credentials(
        config: &Config,
        credentials: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let client = ApiClient::from_config(&config.api, &config.query, credentials)?;
        let cache = Arc::new(QueryCache::with_stale_time(config.query.stale_time()));
        Ok(Self::new(client, cache, notifier))
    }

    pub fn new(client: ApiClient, cache: Arc<QueryCache>, notifier: Arc<dyn Notifier>) -> Self {
        let build = |descriptor: &ResourceDescriptor| {
            let api = Arc::new(ResourceApi::new(client.clone(), *descriptor));
            Resource {
                coordinator: Coordinator::new(api.clone(), Arc::clone(&cache), Arc::clone(&notifier)),
                api,
            }
        };

        let calendars = build(&catalog::CALENDARS);
        let categories = build(&catalog::CATEGORIES);
        let events = build(&catalog::EVENTS);

        // The typed accessors and the namespace lookup hand out the same
        // coordinators, so they share one pending-mutation count.
        let mut resources = HashMap::new();
        resources.insert(catalog::CALENDARS.namespace, calendars.clone());
        resources.insert(catalog::CATEGORIES.namespace, categories.clone());
        resources.insert(catalog::EVENTS.namespace, events.clone());
        for descriptor in catalog::ALL {
            resources
                .entry(descriptor.namespace)
                .or_insert_with(|| build(descriptor));
        }

        tracing::info!(
            "Console ready for {} resources at {}",
            resources.len(),
            client.base_url()
        );

        Self {
            session: Session::new(client.clone()),
            client,
            cache,
            notifier,
            calendars: calendars.coordinator,
            categories: categories.coordinator,
            events: events.coordinator,
            resources,
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn calendars(&self) -> &Coordinator {
        &self.calendars
    }

    pub fn categories(&self) -> &Coordinator {
        &self.categories
    }

    pub fn events(&self) -> &Coordinator {
        &self.events
    }

    /// Coordinator for any catalog namespace.
    pub fn resource(&self, namespace: &str) -> Option<&Coordinator> {
        self.resources.get(namespace).map(|r| &r.coordinator)
    }

    /// Raw API module for actions the coordinator does not cache
    /// (sub-actions, exports).
    pub fn api(&self, namespace: &str) -> Option<&ResourceApi> {
        self.resources.get(namespace).map(|r| r.api.as_ref())
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.is_signed_in()
    }

    /// Sign in. Cached reads belong to the previous identity and are dropped.
    pub async fn login(&self, request: &LoginRequest) -> Result<TokenSet, AppError> {
        let token = self.session.login(request).await?;
        self.cache.clear();
        Ok(token)
    }

    /// Sign out. The cache is cleared even when the credential store fails.
    pub async fn logout(&self) -> Result<(), AppError> {
        let result = self.session.logout().await;
        self.cache.clear();
        result
    }

    /// Upload a spreadsheet to `<resource>/import/` and mark that resource's
    /// lists stale.
    pub async fn import(
        &self,
        namespace: &str,
        upload: MultipartUpload,
    ) -> Result<Value, ApiError> {
        let api = self.api(namespace).ok_or_else(|| ApiError::NotFound {
            message: Some(format!("Unknown resource: {}", namespace)),
        })?;
        let label = api.descriptor().label;

        match api.import(upload).await {
            Ok(value) => {
                self.cache.invalidate_family(namespace, Scope::List);
                self.notifier
                    .notify(Notification::success(format!("{} import completed", label)));
                Ok(value)
            }
            Err(e) => {
                self.notify_failure(&format!("import {}", label.to_lowercase()), &e);
                Err(e)
            }
        }
    }

    /// Run the bulk result processing job. Bounded by the batch timeout;
    /// expiry surfaces as `ApiError::Timeout`.
    pub async fn run_bulk_results(
        &self,
        upload: MultipartUpload,
    ) -> Result<BatchOutcome, ApiError> {
        match self.client.run_batch(BULK_RESULTS_PATH, upload).await {
            Ok(outcome) => {
                self.cache.invalidate_family(catalog::EXAMS.namespace, Scope::List);
                self.notifier
                    .notify(Notification::success("Bulk results processed successfully"));
                Ok(outcome)
            }
            Err(e) => {
                self.notify_failure("process bulk results", &e);
                Err(e)
            }
        }
    }

    fn notify_failure(&self, action: &str, error: &ApiError) {
        let message = match error.server_message() {
            Some(message) => message.to_string(),
            None => format!("Failed to {}. {}", action, error.user_message()),
        };
        self.notifier.notify(Notification::error(message));
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("base_url", &self.client.base_url().as_str())
            .field("resources", &self.resources.len())
            .field("cache", &self.cache)
            .finish()
    }
}
