//! Sign-in and sign-out against the backend's auth endpoints.

use serde::{Deserialize, Serialize};

use emis_auth::TokenSet;
use emis_core::{ApiError, AppError, AuthError};

use crate::catalog::{LOGIN_PATH, LOGOUT_PATH};
use crate::http::ApiClient;

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Token payload. Backends answer with either `access` or `token`.
#[derive(Debug, Clone, Deserialize)]
struct LoginResponse {
    #[serde(alias = "token", alias = "access_token")]
    access: Option<String>,
    #[serde(default, alias = "refresh_token")]
    refresh: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Session {
    client: ApiClient,
}

impl Session {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Whether a credential is stored.
    pub fn is_signed_in(&self) -> bool {
        matches!(self.client.credentials().load(), Ok(Some(token)) if !token.is_expired())
    }

    /// Exchange username/password for a token and store it.
    pub async fn login(&self, request: &LoginRequest) -> Result<TokenSet, AppError> {
        let body = serde_json::to_value(request).map_err(anyhow::Error::from)?;

        let value = match self.client.post_public(LOGIN_PATH, &body).await {
            Ok(value) => value,
            Err(ApiError::Unauthorized { .. }) | Err(ApiError::Validation { status: 400, .. }) => {
                return Err(AuthError::InvalidCredentials.into())
            }
            Err(e) => return Err(e.into()),
        };

        let response: LoginResponse =
            serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))?;
        let access_token = response.access.ok_or(AuthError::MissingToken)?;

        let token = TokenSet {
            access_token,
            refresh_token: response.refresh,
            expires_at: response.expires_at,
        };

        self.client
            .credentials()
            .store(&token)
            .map_err(|e| AuthError::StorageError(format!("{:#}", e)))?;

        tracing::info!("Signed in as {}", request.username);
        Ok(token)
    }

    /// Tell the backend (best effort) and clear the local credential.
    ///
    /// The backend notification may fail silently; the local session is
    /// cleared regardless.
    pub async fn logout(&self) -> Result<(), AppError> {
        if let Err(e) = self.client.post(LOGOUT_PATH, &serde_json::json!({})).await {
            tracing::debug!("Logout notification failed: {}", e);
        }

        self.client
            .credentials()
            .clear()
            .map_err(|e| AuthError::StorageError(format!("{:#}", e)))?;

        tracing::info!("Signed out");
        Ok(())
    }
}
