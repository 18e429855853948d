//! Long-running batch job proxy.
//!
//! The form is forwarded to a backend job that may take minutes. The whole
//! exchange (send plus body read) is bounded by the client's batch timeout,
//! ten minutes by default; on expiry the caller gets `ApiError::Timeout`.

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::instrument;

use emis_core::ApiError;

use crate::http::{decode_json, ApiClient};
use crate::resource::Filters;
use crate::transfer::{Download, MultipartUpload};

/// What the job returned, chosen by the response `Content-Type`.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Json(Value),
    Spreadsheet(Download),
}

impl ApiClient {
    #[instrument(skip(self, upload), fields(file = %upload.file_name), level = "info")]
    pub async fn run_batch(
        &self,
        path: &str,
        upload: MultipartUpload,
    ) -> Result<BatchOutcome, ApiError> {
        let url = self.endpoint(path, &Filters::new())?;
        let request = self
            .authorized(self.client.post(url))?
            .multipart(upload.into_form()?)
            .timeout(self.batch_timeout);

        let exchange = async {
            let response = self.send(request).await?;
            let is_json = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.contains("json"));

            if is_json {
                decode_json(response).await.map(BatchOutcome::Json)
            } else {
                Download::from_response(response)
                    .await
                    .map(BatchOutcome::Spreadsheet)
            }
        };

        match tokio::time::timeout(self.batch_timeout, exchange).await {
            Ok(result) => {
                if let Err(e) = &result {
                    tracing::warn!("Batch job failed: {}", e);
                }
                result
            }
            Err(_) => {
                tracing::error!("Batch job exceeded {:?}", self.batch_timeout);
                Err(ApiError::Timeout)
            }
        }
    }
}
