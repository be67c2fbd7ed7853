//! Error types for the release engine

use thiserror::Error;

/// Release engine error type
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// Missing or invalid per-deploy-type configuration
    #[error("validation: {0}")]
    Validation(String),

    /// Unknown release/project/environment/target id
    #[error("not found: {0}")]
    NotFound(String),

    /// Command dispatch failed
    #[error("transport: {0}")]
    Transport(#[from] drover_command::CommandError),

    /// No terminal acknowledgment within the wait budget
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The remote side reported a failure
    #[error("remote execution failed: {0}")]
    RemoteExecution(String),

    /// The surrounding release or task was cancelled
    #[error("cancelled")]
    Cancelled,

    /// The release is not in a state that allows the operation
    #[error("release status is {current}, expected one of {expected:?}")]
    InvalidState {
        current: String,
        expected: Vec<String>,
    },

    /// Store backend failure
    #[error("store: {0}")]
    Store(String),

    /// Payload or result (de)serialization failed
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<crate::store::StoreError> for ReleaseError {
    fn from(err: crate::store::StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result type for release operations
pub type Result<T> = std::result::Result<T, ReleaseError>;
