use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Credential issued by the EMIS backend at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Bearer token attached to every API request
    pub access_token: String,

    /// Optional refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Expiration timestamp (Unix seconds), when the backend reports one
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Check if the token is expired. Tokens without an expiry never expire
    /// locally; the backend rejects them with 401 instead.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => chrono::Utc::now().timestamp() >= expires_at,
            None => false,
        }
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Where the current session's credential lives.
///
/// Stores are injected into the HTTP client so tests and embedders can
/// swap the file store for an in-memory one.
pub trait CredentialStore: Send + Sync {
    /// The stored credential, or `None` when signed out.
    fn load(&self) -> Result<Option<TokenSet>>;

    fn store(&self, token_set: &TokenSet) -> Result<()>;

    /// Remove the stored credential. Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;
}

/// File-based credential storage in the user's config directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Store under `<config_dir>/tokens/<service>.json`
    pub fn for_service(config_dir: &Path, service: &str) -> Self {
        Self::at(config_dir.join("tokens").join(format!("{}.json", service)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<TokenSet>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path).context("Failed to read token file")?;

        let token_set: TokenSet =
            serde_json::from_str(&json).context("Failed to deserialize token set")?;

        Ok(Some(token_set))
    }

    fn store(&self, token_set: &TokenSet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create tokens directory")?;
        }

        let json =
            serde_json::to_string_pretty(token_set).context("Failed to serialize token set")?;

        fs::write(&self.path, json).context("Failed to write token file")?;

        tracing::info!("Stored credential at {:?}", self.path);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).context("Failed to delete token file")?;
            tracing::info!("Deleted credential at {:?}", self.path);
        }
        Ok(())
    }
}

/// Process-local credential storage.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<TokenSet>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(access_token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(TokenSet::new(access_token))),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<TokenSet>> {
        Ok(self.token.lock().clone())
    }

    fn store(&self, token_set: &TokenSet) -> Result<()> {
        *self.token.lock() = Some(token_set.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.token.lock() = None;
        Ok(())
    }
}
