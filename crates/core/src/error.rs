//! Error types for the DocForge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Backend failures carry a classification that drives retry policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A failure reported by (or on behalf of) a single backend call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// Missing or invalid configuration (credentials, model, bad request).
    #[error("Backend misconfigured: {0}")]
    Configuration(String),

    /// The backend rejected our credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The backend signalled throttling, optionally with a retry hint.
    #[error("Rate limited by backend (retry hint: {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Timeouts, connection resets and 5xx-class responses.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The circuit breaker rejected the call without touching the network.
    #[error("Circuit open for backend '{backend}'")]
    CircuitOpen { backend: String },

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,
}

/// Coarse classification of a [`BackendError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Configuration,
    Auth,
    RateLimit,
    Transient,
    CircuitOpen,
    Cancelled,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Transient => "transient",
            Self::CircuitOpen => "circuit_open",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BackendError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration(_) => ErrorClass::Configuration,
            Self::Auth(_) => ErrorClass::Auth,
            Self::RateLimited { .. } => ErrorClass::RateLimit,
            Self::Transient(_) => ErrorClass::Transient,
            Self::CircuitOpen { .. } => ErrorClass::CircuitOpen,
            Self::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Fatal errors are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Auth(_))
    }

    /// Whether the retry controller may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// Map an HTTP status (and body) from a backend to an error.
    ///
    /// `retry_after` is the parsed `Retry-After` header, if any.
    pub fn from_status(status: u16, body: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Self::Auth(format!("HTTP {status}: {body}")),
            429 => Self::RateLimited { retry_after },
            408 | 500..=599 => Self::Transient(format!("HTTP {status}: {body}")),
            _ => Self::Configuration(format!("HTTP {status}: {body}")),
        }
    }
}
