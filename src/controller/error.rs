//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Database data-plane API error
    #[error("Database error: {0}")]
    Database(String),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Bounded wait or health check ran out of time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl Error {
    /// Whether another pass could succeed without a spec change.
    ///
    /// API rejections other than conflicts and throttling (bad request,
    /// forbidden, not found, invalid) need a human; so do spec and
    /// serialization errors. Transport failures are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(e)) => e.code >= 500 || e.code == 429 || e.code == 409,
            Error::Kube(_) => true,
            Error::Database(_) | Error::Transient(_) | Error::Timeout(_) => true,
            Error::Validation(_) | Error::MissingField(_) => false,
            Error::Serialization(_) => false,
        }
    }

    /// Short label used for the error-type metric dimension
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Kube(_) => "kube",
            Error::Database(_) => "database",
            Error::MissingField(_) => "missing_field",
            Error::Validation(_) => "validation",
            Error::Transient(_) => "transient",
            Error::Timeout(_) => "timeout",
            Error::Serialization(_) => "serialization",
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
