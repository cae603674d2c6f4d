//! Shared error currency for the coordination core.
//!
//! Failures from the external persistence collaborator arrive as
//! [`ApiError`] values. [`classification`] decides which of those are
//! network-class, which is what the offline queue keys retry decisions on.

pub mod classification;

pub use classification::{classify_api_error, failure_class_label, FailureClass};

use thiserror::Error;

/// Error reported by the external persistence collaborator.
///
/// Carries an optional machine code alongside the human message so that
/// [`classify_api_error`] can tell transport failures from application
/// failures without knowing the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    /// Machine-readable code when the backend provides one
    /// (for example `unavailable` or `deadline-exceeded`).
    pub code: Option<String>,
    /// Human-readable description of the failure.
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// True when this failure is network-class and may succeed on retry.
    pub fn is_network(&self) -> bool {
        classify_api_error(self).is_retryable()
    }
}
