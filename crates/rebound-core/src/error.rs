//! Error types shared by strategies, the backoff controller and the retry wrappers.
//!
//! Only caller-facing failures live here: invalid configuration and misuse of
//! a component that is already busy. Errors produced by a retried operation are
//! never converted into [`BackoffError`]; they travel through the completion
//! channel with their own type.

/// Result type for backoff operations
pub type Result<T> = std::result::Result<T, BackoffError>;

/// Errors raised synchronously by backoff components.
///
/// Neither variant describes a transient condition, so neither is ever retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    /// A strategy option or a retry ceiling violates its precondition.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The component is armed or running and cannot accept this call now.
    #[error("Operation in progress: {0}")]
    OperationInProgress(&'static str),
}

impl BackoffError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Whether this error reports an invalid configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }

    /// Whether this error reports a call made while busy.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::OperationInProgress(_))
    }
}

impl From<serde_json::Error> for BackoffError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidConfiguration(err.to_string())
    }
}
