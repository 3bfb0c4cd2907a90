//! Error types used throughout the client runtime
//!
//! Errors are grouped by *kind* rather than by where they were raised. The
//! request pipeline branches on [`ErrorKind`] to decide whether to retry,
//! whether a failure says anything about backend health, and whether a
//! cached or queued fallback applies.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Classification of a [`ConnexaError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Validation,
    NotFound,
    RateLimit,
    Network,
    Server,
    Timeout,
    CircuitOpen,
    FeatureNotSupported,
    Configuration,
    Storage,
    Internal,
}

/// Main error type for the Connexa client runtime
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum ConnexaError {
    #[error("Authentication failed: {message}")]
    Authentication { status: Option<u16>, message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String, details: Option<Value> },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String, retry_after: Option<Duration> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Circuit breaker is open, call rejected without contacting the API")]
    CircuitOpen { retry_in: Option<Duration> },

    #[error("Feature '{feature}' is not supported by API version {version}")]
    FeatureNotSupported { feature: String, version: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConnexaError {
    /// Kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Network(_) => ErrorKind::Network,
            Self::Server { .. } => ErrorKind::Server,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::FeatureNotSupported { .. } => ErrorKind::FeatureNotSupported,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::Server | ErrorKind::Timeout
        )
    }

    /// Failures that indicate an unhealthy backend and feed the circuit breaker
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Server | ErrorKind::Timeout)
    }

    /// Failures after which a cached read or a queued write is an acceptable
    /// answer
    pub fn allows_offline_fallback(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network
                | ErrorKind::Server
                | ErrorKind::Timeout
                | ErrorKind::CircuitOpen
                | ErrorKind::RateLimit
        )
    }

    /// Server or limiter supplied wait hint
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            Self::CircuitOpen { retry_in } => *retry_in,
            _ => None,
        }
    }

    /// Map an HTTP error status and parsed error body to an error kind.
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        retry_after: Option<Duration>,
        details: Option<Value>,
    ) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Authentication { status: Some(status), message },
            404 => Self::NotFound { resource: message },
            408 => Self::Timeout(message),
            429 => Self::RateLimit { message, retry_after },
            500..=599 => Self::Server { status, message },
            _ => Self::Validation { message, details },
        }
    }
}

/// A request the pipeline could not resolve.
///
/// The underlying error is surfaced unchanged in kind, with the attempt
/// count and elapsed time attached for logging or display.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{source} (after {attempts} attempt(s) in {elapsed:?})")]
pub struct ExecutionError {
    #[source]
    pub source: ConnexaError,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl ExecutionError {
    pub fn new(source: ConnexaError, attempts: u32, elapsed: Duration) -> Self {
        Self { source, attempts, elapsed }
    }

    /// Kind of the underlying error
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// Result type alias for Connexa operations
pub type Result<T> = std::result::Result<T, ConnexaError>;
