//! Authenticated HTTP client for the EMIS REST backend.
//!
//! Every request carries `Authorization: Bearer <token>` from the injected
//! credential store. With no stored credential the request is never sent and
//! the call fails with `ApiError::Unauthorized`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::instrument;
use url::Url;

use emis_auth::CredentialStore;
use emis_core::{ApiConfig, ApiError, QueryConfig, ReqwestErrorExt};

use crate::resource::Filters;
use crate::retry::{with_retry, RetryConfig};
use crate::transfer::{Download, MultipartUpload};

/// Longest plain-text error body passed through as a server message.
const MAX_TEXT_MESSAGE_LEN: usize = 300;

#[derive(Clone)]
pub struct ApiClient {
    base_url: Url,
    pub(crate) client: Client,
    credentials: Arc<dyn CredentialStore>,
    retry: RetryConfig,
    pub(crate) batch_timeout: Duration,
}

impl ApiClient {
    /// Create a client for `base_url` with default timeouts.
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        Self::from_config(
            &ApiConfig {
                base_url: base_url.to_string(),
                ..ApiConfig::default()
            },
            &QueryConfig::default(),
            credentials,
        )
    }

    pub fn from_config(
        api: &ApiConfig,
        query: &QueryConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let mut base_url = Url::parse(&api.base_url).context("Invalid API base URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = Client::builder().timeout(api.request_timeout());

        if api.allow_invalid_certs {
            if cfg!(debug_assertions) {
                tracing::warn!("Certificate validation disabled for {}", base_url);
                builder = builder.danger_accept_invalid_certs(true);
            } else {
                tracing::warn!("allow_invalid_certs ignored in release builds");
            }
        }

        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            client,
            credentials,
            retry: RetryConfig::from_query_config(query),
            batch_timeout: api.batch_timeout(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Resolve `path` against the base URL, enforcing the trailing slash.
    pub fn endpoint(&self, path: &str, params: &Filters) -> Result<Url, ApiError> {
        let mut path = path.trim_start_matches('/').to_string();
        if !path.ends_with('/') {
            path.push('/');
        }

        let mut url = self
            .base_url
            .join(&path)
            .map_err(|e| ApiError::Validation {
                status: 0,
                message: Some(format!("Invalid path {:?}: {}", path, e)),
            })?;

        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }

        Ok(url)
    }

    /// Bearer header for the stored credential.
    fn bearer(&self) -> Result<String, ApiError> {
        match self.credentials.load() {
            Ok(Some(token)) if !token.is_expired() => Ok(token.bearer()),
            Ok(Some(_)) => {
                tracing::info!("Stored credential has expired; not sending request");
                Err(ApiError::Unauthorized { message: None })
            }
            Ok(None) => {
                tracing::debug!("No stored credential; not sending request");
                Err(ApiError::Unauthorized { message: None })
            }
            Err(e) => {
                tracing::warn!("Failed to load credential: {:#}", e);
                Err(ApiError::Unauthorized { message: None })
            }
        }
    }

    pub(crate) fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        Ok(request.header(AUTHORIZATION, self.bearer()?))
    }

    /// Send and turn non-success statuses into `ApiError`.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(ReqwestErrorExt::into_api_error)?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// GET a JSON document. Retried on transient failures.
    #[instrument(skip(self, params), level = "debug")]
    pub async fn get(&self, path: &str, params: &Filters) -> Result<Value, ApiError> {
        let url = self.endpoint(path, params)?;
        let bearer = self.bearer()?;
        let (url, bearer) = (&url, &bearer);

        with_retry(&self.retry, move || async move {
            let request = self.client.get(url.clone()).header(AUTHORIZATION, bearer);
            decode_json(self.send(request).await?).await
        })
        .await
    }

    /// GET a binary payload (exports, attachments). Retried on transient failures.
    #[instrument(skip(self, params), level = "debug")]
    pub async fn get_blob(&self, path: &str, params: &Filters) -> Result<Download, ApiError> {
        let url = self.endpoint(path, params)?;
        let bearer = self.bearer()?;
        let (url, bearer) = (&url, &bearer);

        with_retry(&self.retry, move || async move {
            let request = self.client.get(url.clone()).header(AUTHORIZATION, bearer);
            Download::from_response(self.send(request).await?).await
        })
        .await
    }

    #[instrument(skip(self, body), level = "debug")]
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let url = self.endpoint(path, &Filters::new())?;
        let request = self.authorized(self.client.post(url))?.json(body);
        decode_json(self.send(request).await?).await
    }

    #[instrument(skip(self, body), level = "debug")]
    pub async fn patch(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let url = self.endpoint(path, &Filters::new())?;
        let request = self.authorized(self.client.patch(url))?.json(body);
        decode_json(self.send(request).await?).await
    }

    /// DELETE; an empty success body decodes as `Value::Null`.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        let url = self.endpoint(path, &Filters::new())?;
        let request = self.authorized(self.client.delete(url))?;
        decode_json(self.send(request).await?).await
    }

    /// POST a multipart form.
    #[instrument(skip(self, upload), fields(file = %upload.file_name), level = "debug")]
    pub async fn upload(&self, path: &str, upload: MultipartUpload) -> Result<Value, ApiError> {
        let url = self.endpoint(path, &Filters::new())?;
        let request = self
            .authorized(self.client.post(url))?
            .multipart(upload.into_form()?);
        decode_json(self.send(request).await?).await
    }

    /// POST without a credential (login).
    pub(crate) async fn post_public(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let url = self.endpoint(path, &Filters::new())?;
        let request = self.client.post(url).json(body);
        decode_json(self.send(request).await?).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("retry", &self.retry)
            .field("batch_timeout", &self.batch_timeout)
            .finish()
    }
}

pub(crate) async fn decode_json(response: Response) -> Result<Value, ApiError> {
    if response.status() == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }

    let bytes = response
        .bytes()
        .await
        .map_err(ReqwestErrorExt::into_api_error)?;

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

async fn error_from_response(response: Response) -> ApiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = server_message(&body);

    tracing::debug!(status, message = ?message, "Request failed");
    ApiError::from_status(status, message)
}

/// Extract the human-readable message from an error body.
///
/// Recognizes `{"detail": ..}`, `{"message": ..}`, `{"error": ..}`, field
/// error maps (`{"name": ["required"]}`), bare strings and string arrays.
/// Falls back to short non-HTML text bodies.
pub fn server_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => message_from_json(&value),
        Err(_) if !trimmed.starts_with('<') && trimmed.len() <= MAX_TEXT_MESSAGE_LEN => {
            Some(trimmed.to_string())
        }
        Err(_) => None,
    }
}

fn message_from_json(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(message_from_json).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Object(map) => {
            for key in ["detail", "message", "error"] {
                if let Some(message) = map.get(key).and_then(message_from_json) {
                    return Some(message);
                }
            }

            let parts: Vec<String> = map
                .iter()
                .filter_map(|(field, v)| {
                    let message = message_from_json(v)?;
                    Some(if field == "non_field_errors" {
                        message
                    } else {
                        format!("{}: {}", field, message)
                    })
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        _ => None,
    }
}
