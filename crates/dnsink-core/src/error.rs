//! Error types for the reconciler
//!
//! The variants follow the failure taxonomy the handlers act on: ambiguous
//! targets are skipped, backend failures fail a single step, expected
//! absences are `NotFound`, and malformed payloads abandon the notification.

use thiserror::Error;

/// Result type alias for reconciler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the reconciler
#[derive(Error, Debug)]
pub enum Error {
    /// Zone-management service errors
    #[error("DNS service error: {0}")]
    Dns(String),

    /// Compute platform errors
    #[error("Compute service error: {0}")]
    Compute(String),

    /// IPAM backend errors
    #[error("IPAM error: {0}")]
    Ipam(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness constraint violated by a concurrent writer
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Zero or several candidates where exactly one was required
    #[error("Ambiguous target: {0}")]
    AmbiguousTarget(String),

    /// Notification payload missing or mistyping a required field
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Backend-specific error
    #[error("Backend error ({backend}): {message}")]
    Backend {
        /// Backend name
        backend: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a DNS service error
    pub fn dns(msg: impl Into<String>) -> Self {
        Self::Dns(msg.into())
    }

    /// Create a compute service error
    pub fn compute(msg: impl Into<String>) -> Self {
        Self::Compute(msg.into())
    }

    /// Create an IPAM error
    pub fn ipam(msg: impl Into<String>) -> Self {
        Self::Ipam(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an ambiguous-target error
    pub fn ambiguous(msg: impl Into<String>) -> Self {
        Self::AmbiguousTarget(msg.into())
    }

    /// Create a malformed-payload error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload(msg.into())
    }

    /// Create a backend-specific error
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Whether this error reports an expected absence rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether a concurrent writer won a uniqueness race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
