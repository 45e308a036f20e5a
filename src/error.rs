//! Error types for the herder
//!
//! Every caller-facing operation resolves to either a success value or one of
//! these typed errors; internal worker failures off the caller's critical
//! path are logged and absorbed instead.

use crate::types::{ConnectorId, TaskId};
use crate::worker::WorkerError;
use thiserror::Error;

/// Result type alias for herder operations
pub type HerderResult<T> = std::result::Result<T, HerderError>;

/// Errors surfaced through the herder's caller-facing API
#[derive(Debug, Error)]
pub enum HerderError {
    /// Connector config rejected by plugin validation; no mutation occurred
    #[error("connector configuration is invalid: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    /// Referenced connector or task absent from the current snapshot
    #[error("{0} not found")]
    NotFound(String),

    /// Create-without-replace on an existing connector id
    #[error("connector {0} already exists")]
    AlreadyExists(ConnectorId),

    /// A worker start/stop call on the caller's critical path failed
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Operation disallowed for this deployment mode
    #[error("operation not supported in standalone mode: {0}")]
    Unsupported(&'static str),

    /// The herder is shutting down and no longer accepts work
    #[error("herder is shutting down")]
    ShuttingDown,
}

impl HerderError {
    /// Validation failure with the plugin's error messages
    pub fn validation(errors: Vec<String>) -> Self {
        Self::Validation { errors }
    }

    /// NotFound for a connector name
    pub fn connector_not_found(name: &ConnectorId) -> Self {
        Self::NotFound(format!("connector {name}"))
    }

    /// NotFound for a task id
    pub fn task_not_found(id: &TaskId) -> Self {
        Self::NotFound(format!("task {id}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
