//! Centralized error types for the EMIS console client.
//!
//! `ApiError` is the taxonomy every backend call reports. The remaining
//! enums cover local concerns (configuration, credentials) and all of them
//! fold into `AppError`, whose `user_message()` is what screens display.

use thiserror::Error;

/// Top-level application error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Returns a user-friendly message suitable for display in the UI.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Api(e) => e.user_message(),
            AppError::Config(e) => e.user_message().to_string(),
            AppError::Auth(e) => e.user_message().to_string(),
            AppError::Io(_) => "A file operation failed. Please try again.".to_string(),
            AppError::Other(_) => "An unexpected error occurred. Please try again.".to_string(),
        }
    }
}

/// Errors surfaced by the HTTP boundary.
///
/// The type is `Clone` so a single failed request can be handed to every
/// caller that joined the same in-flight read.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Missing or rejected credential. `message` is `None` when the request
    /// was never sent because no credential was stored.
    #[error("Unauthorized{}", fmt_detail(.message))]
    Unauthorized { message: Option<String> },

    #[error("Not found{}", fmt_detail(.message))]
    NotFound { message: Option<String> },

    /// Any other 4xx response.
    #[error("Request rejected ({status}){}", fmt_detail(.message))]
    Validation { status: u16, message: Option<String> },

    #[error("Server error ({status}){}", fmt_detail(.message))]
    Server { status: u16, message: Option<String> },

    #[error("Request timed out")]
    Timeout,

    /// The request never reached the server.
    #[error("Network failure: {0}")]
    Network(String),

    /// A success response whose body could not be decoded.
    #[error("Invalid response: {0}")]
    Decode(String),
}

fn fmt_detail(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(": {}", m),
        None => String::new(),
    }
}

impl ApiError {
    /// Build the error for a non-success HTTP status.
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        match status {
            401 => ApiError::Unauthorized { message },
            404 => ApiError::NotFound { message },
            400..=499 => ApiError::Validation { status, message },
            _ => ApiError::Server { status, message },
        }
    }

    /// HTTP status carried by the error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { message: Some(_) } => Some(401),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Validation { status, .. } | ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message provided by the server, passed through verbatim.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized { message }
            | ApiError::NotFound { message }
            | ApiError::Validation { message, .. }
            | ApiError::Server { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// Whether re-issuing the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout | ApiError::Network(_) | ApiError::Server { .. } => true,
            ApiError::Validation { status, .. } => *status == 408 || *status == 429,
            _ => false,
        }
    }

    /// Whether the user has to sign in again.
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// Server message when present, otherwise a generic message per kind.
    pub fn user_message(&self) -> String {
        if let Some(message) = self.server_message() {
            return message.to_string();
        }
        match self {
            ApiError::Unauthorized { .. } => "Your session has expired. Please sign in again.",
            ApiError::NotFound { .. } => "The requested record was not found.",
            ApiError::Validation { .. } => "The request was rejected. Check the form and try again.",
            ApiError::Server { .. } => "The server is experiencing issues. Please try again later.",
            ApiError::Timeout => "The request timed out. Please try again.",
            ApiError::Network(_) => "Unable to connect. Check your internet connection.",
            ApiError::Decode(_) => "Received an unexpected response. Please try again.",
        }
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}

/// Credential errors (login, token storage).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Login response did not contain a token")]
    MissingToken,

    #[error("Credential storage error: {0}")]
    StorageError(String),
}

impl AuthError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "Invalid credentials. Please check and try again.",
            AuthError::MissingToken => "Sign-in failed. Please try again.",
            AuthError::StorageError(_) => "Failed to save credentials. Please try again.",
        }
    }
}

/// Extension trait for converting transport-level reqwest errors.
pub trait ReqwestErrorExt {
    fn into_api_error(self) -> ApiError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_api_error(self) -> ApiError {
        if self.is_timeout() {
            ApiError::Timeout
        } else if self.is_decode() {
            ApiError::Decode(self.to_string())
        } else if let Some(status) = self.status() {
            ApiError::from_status(status.as_u16(), None)
        } else {
            ApiError::Network(self.to_string())
        }
    }
}
