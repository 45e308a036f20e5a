//! The worker collaborator: owns connector/task runtime instances
//!
//! The herder never runs plugin code itself. Starting and stopping runtime
//! instances, validating configs, and generating task configs all go through
//! this trait. Stop calls block until the old instance has fully released its
//! external resources; start calls may run arbitrarily slow plugin code and
//! are spawned off the serializer by the herder.

use crate::herder::ConnectorContext;
use crate::snapshot::ClusterConfigState;
use crate::status::StatusStore;
use crate::types::{ConnectorId, RawConfig, TargetState, TaskId};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for worker operations
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// Errors reported by worker start/stop/config-generation calls
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("connector {name} failed to start: {reason}")]
    ConnectorStart { name: ConnectorId, reason: String },

    #[error("task {id} failed to start: {reason}")]
    TaskStart { id: TaskId, reason: String },

    /// A stop call failed or timed out; treated as resolved by the herder
    #[error("stop failed: {0}")]
    Stop(String),

    #[error("task config generation for {name} failed: {reason}")]
    TaskConfigs { name: ConnectorId, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkerError {
    pub fn connector_start(name: &ConnectorId, reason: impl Into<String>) -> Self {
        Self::ConnectorStart {
            name: name.clone(),
            reason: reason.into(),
        }
    }

    pub fn task_start(id: &TaskId, reason: impl Into<String>) -> Self {
        Self::TaskStart {
            id: id.clone(),
            reason: reason.into(),
        }
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        Self::Stop(reason.into())
    }
}

/// Runtime owner of connector and task instances, consumed by the herder.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Run plugin-supplied validation on a connector config. Returns the
    /// validation error messages; an empty list means the config is valid.
    async fn validate_connector_config(&self, config: &RawConfig) -> WorkerResult<Vec<String>>;

    /// Start a connector instance asynchronously. Resolves with the target
    /// state the instance settled in.
    async fn start_connector(
        &self,
        name: &ConnectorId,
        config: RawConfig,
        ctx: ConnectorContext,
        status: Arc<StatusStore>,
        target: TargetState,
    ) -> WorkerResult<TargetState>;

    /// Stop a connector and block until the old instance has fully released
    /// its resources.
    async fn stop_and_await_connector(&self, name: &ConnectorId) -> WorkerResult<()>;

    /// Start a task instance from an already-persisted config.
    async fn start_task(
        &self,
        id: &TaskId,
        snapshot: Arc<ClusterConfigState>,
        connector_config: RawConfig,
        task_config: RawConfig,
        status: Arc<StatusStore>,
        target: TargetState,
    ) -> WorkerResult<()>;

    /// Stop a single task, blocking until it has released its resources.
    async fn stop_and_await_task(&self, id: &TaskId) -> WorkerResult<()>;

    /// Stop a batch of tasks, blocking until all have released their
    /// resources.
    async fn stop_and_await_tasks(&self, ids: &[TaskId]) -> WorkerResult<()>;

    /// Whether a connector instance is currently live on this worker.
    fn is_running(&self, name: &ConnectorId) -> bool;

    /// Names of all connectors currently known to this worker.
    fn connector_names(&self) -> Vec<ConnectorId>;

    /// Transition a running connector (and its tasks) to a new target state.
    async fn set_target_state(
        &self,
        name: &ConnectorId,
        state: TargetState,
    ) -> WorkerResult<TargetState>;

    /// Invoke the connector's own config-generation hook with its declared
    /// parallelism, producing the desired ordered task-config sequence.
    async fn connector_task_configs(
        &self,
        name: &ConnectorId,
        connector_config: &RawConfig,
        max_tasks: u32,
    ) -> WorkerResult<Vec<RawConfig>>;
}
