//! Error types for Taskbot
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::platform::PlatformError;

/// All error types that can occur in Taskbot
#[derive(Debug, Error)]
pub enum TaskbotError {
    /// A required destination or credential is not set
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The platform refused a role or message mutation
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Member, role or resource is gone
    #[error("Not found: {0}")]
    NotFound(String),

    /// Retryable failure talking to an external service
    #[error("Transient error: {0}")]
    Transient(String),

    /// Administrative input out of range
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Admin socket communication error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaskbotError {
    /// Benign errors are expected churn (a member left, a role is already gone)
    pub fn is_benign(&self) -> bool {
        matches!(self, TaskbotError::NotFound(_))
    }
}

impl From<PlatformError> for TaskbotError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Forbidden(msg) | PlatformError::Refused(msg) => TaskbotError::Permission(msg),
            PlatformError::NotFound(msg) => TaskbotError::NotFound(msg),
            PlatformError::NotConfigured(msg) => TaskbotError::Configuration(msg),
            PlatformError::InvalidUrl(url) => TaskbotError::Configuration(format!("invalid URL: {}", url)),
            PlatformError::OutOfBounds { row, rows } => {
                TaskbotError::Validation(format!("row {} is outside the sheet ({} rows)", row, rows))
            }
            other => TaskbotError::Transient(other.to_string()),
        }
    }
}

/// Result type alias for Taskbot operations
pub type Result<T> = std::result::Result<T, TaskbotError>;
