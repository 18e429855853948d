use thiserror::Error;

use emis_core::ApiError;

use crate::key::CacheKey;

/// A failed read. Nothing was cached and nothing needs undoing; the caller
/// offers a retry.
#[derive(Debug, Clone, Error)]
#[error("Failed to load {key}: {source}")]
pub struct QueryError {
    pub key: CacheKey,
    #[source]
    pub source: ApiError,
}

impl QueryError {
    pub fn new(key: CacheKey, source: ApiError) -> Self {
        Self { key, source }
    }

    /// Whether offering "try again" makes sense.
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }

    pub fn user_message(&self) -> String {
        self.source.user_message()
    }
}
