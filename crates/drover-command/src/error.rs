//! Error types for command dispatch and tracking

use crate::transport::TransportError;
use drover_types::{CommandId, TaskId};
use thiserror::Error;

/// Command tracking error type
#[derive(Debug, Error)]
pub enum CommandError {
    /// Unknown command id
    #[error("command not found: {0}")]
    NotFound(CommandId),

    /// Unknown fan-out task id
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The fan-out task is not in a cancellable state
    #[error("task is not running: {0}")]
    TaskNotRunning(String),

    /// The transport refused or failed the send
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// Payload serialization failed
    #[error("serialize command payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for command operations
pub type Result<T> = std::result::Result<T, CommandError>;
