//! Error types for PaperScope
//!
//! Provides a single error enum covering the failure modes the crate
//! distinguishes:
//! - Configuration errors (invalid chunk parameters, bad config files)
//! - Provider errors (transient upstream failures, retried by the client)
//! - Store and embedding errors
//! - Persistence errors (telemetry save/load)

use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Provider timeout after {timeout_ms}ms")]
    ProviderTimeout { timeout_ms: u64 },

    #[error("Context store error: {message}")]
    Store { message: String },

    #[error("Embedding error: {message}")]
    Embedding { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the retry loop in the model client should attempt again.
    ///
    /// Configuration errors never become transient by waiting; everything
    /// that crossed a network is assumed retryable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Provider { .. }
                | AppError::ProviderTimeout { .. }
                | AppError::Embedding { .. }
                | AppError::HttpClient(_)
        )
    }

    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        AppError::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for a provider error
    pub fn provider(message: impl Into<String>) -> Self {
        AppError::Provider {
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
