//! Error types for the submission pipeline

use thiserror::Error;

/// Main error type for submission operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// User-supplied configuration is malformed or collides with reserved keys
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A pipeline precondition does not hold (e.g. local dependency without a
    /// staging endpoint)
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Staging endpoint transport failure; surfaced unchanged, never retried
    #[error("staging error: {0}")]
    Staging(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// An internal assembly invariant was violated; indicates a defect in the
    /// pipeline, not a user error
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a precondition error with the given message
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a staging error with the given message
    pub fn staging(msg: impl Into<String>) -> Self {
        Self::Staging(msg.into())
    }

    /// Create an invariant-violation error with the given message
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}
