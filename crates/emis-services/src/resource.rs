//! Entity API modules: one stateless CRUD mapping per backend resource.
//!
//! ```text
//! get_all(filters)   GET    /<module>/<resource>/?filters
//! get_by_id(id)      GET    /<module>/<resource>/<id>/
//! create(data)       POST   /<module>/<resource>/
//! update(id, data)   PATCH  /<module>/<resource>/<id>/
//! delete(id)         DELETE /<module>/<resource>/<id>/
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use emis_core::ApiError;

use crate::http::ApiClient;
use crate::transfer::{Download, MultipartUpload};

/// Query parameters for list reads. Ordered so equal filter sets compare
/// and serialize identically regardless of insertion order.
pub type Filters = BTreeMap<String, String>;

/// Identity of a backend resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceDescriptor {
    /// First path segment, e.g. `calendar`
    pub module: &'static str,
    /// Second path segment, e.g. `events`
    pub resource: &'static str,
    /// Cache key namespace, unique per resource
    pub namespace: &'static str,
    /// Singular human name used in notifications
    pub label: &'static str,
}

impl ResourceDescriptor {
    pub const fn new(
        module: &'static str,
        resource: &'static str,
        namespace: &'static str,
        label: &'static str,
    ) -> Self {
        Self {
            module,
            resource,
            namespace,
            label,
        }
    }

    /// `<module>/<resource>/`
    pub fn collection_path(&self) -> String {
        format!("{}/{}/", self.module, self.resource)
    }

    /// `<module>/<resource>/<id>/`
    pub fn item_path(&self, id: &str) -> String {
        format!("{}/{}/{}/", self.module, self.resource, encode_segment(id))
    }

    /// `<module>/<resource>/[<id>/]<action>/`
    pub fn action_path(&self, id: Option<&str>, action: &str) -> String {
        let action = action.trim_matches('/');
        match id {
            Some(id) => format!("{}{}/", self.item_path(id), action),
            None => format!("{}{}/", self.collection_path(), action),
        }
    }
}

fn encode_segment(id: &str) -> String {
    url::form_urlencoded::byte_serialize(id.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// CRUD seam the coordinator is written against.
///
/// Implementations hold no state of their own and propagate `ApiError`
/// unchanged.
#[async_trait]
pub trait EntityApi: Send + Sync {
    fn descriptor(&self) -> &ResourceDescriptor;

    async fn get_all(&self, filters: &Filters) -> Result<Value, ApiError>;

    async fn get_by_id(&self, id: &str) -> Result<Value, ApiError>;

    async fn create(&self, data: &Value) -> Result<Value, ApiError>;

    async fn update(&self, id: &str, data: &Value) -> Result<Value, ApiError>;

    async fn delete(&self, id: &str) -> Result<Value, ApiError>;
}

/// REST implementation of `EntityApi` over the shared `ApiClient`.
#[derive(Debug, Clone)]
pub struct ResourceApi {
    client: ApiClient,
    descriptor: ResourceDescriptor,
}

impl ResourceApi {
    pub fn new(client: ApiClient, descriptor: ResourceDescriptor) -> Self {
        Self { client, descriptor }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// POST to a sub-action, on the collection or on one item
    /// (`/calendar/events/4/publish/`).
    pub async fn action(
        &self,
        id: Option<&str>,
        action: &str,
        body: &Value,
    ) -> Result<Value, ApiError> {
        self.client
            .post(&self.descriptor.action_path(id, action), body)
            .await
    }

    /// Download the collection export (`/<module>/<resource>/export/`).
    pub async fn export(&self, filters: &Filters) -> Result<Download, ApiError> {
        self.client
            .get_blob(&self.descriptor.action_path(None, "export"), filters)
            .await
    }

    /// Upload a file to `/<module>/<resource>/import/`.
    pub async fn import(&self, upload: MultipartUpload) -> Result<Value, ApiError> {
        self.client
            .upload(&self.descriptor.action_path(None, "import"), upload)
            .await
    }
}

#[async_trait]
impl EntityApi for ResourceApi {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    async fn get_all(&self, filters: &Filters) -> Result<Value, ApiError> {
        self.client
            .get(&self.descriptor.collection_path(), filters)
            .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Value, ApiError> {
        self.client
            .get(&self.descriptor.item_path(id), &Filters::new())
            .await
    }

    async fn create(&self, data: &Value) -> Result<Value, ApiError> {
        self.client
            .post(&self.descriptor.collection_path(), data)
            .await
    }

    async fn update(&self, id: &str, data: &Value) -> Result<Value, ApiError> {
        self.client.patch(&self.descriptor.item_path(id), data).await
    }

    async fn delete(&self, id: &str) -> Result<Value, ApiError> {
        self.client.delete(&self.descriptor.item_path(id)).await
    }
}
