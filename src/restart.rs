//! Restart requests and side-effect-free restart planning

use crate::snapshot::ClusterConfigState;
use crate::status::{LifecycleState, StatusStore};
use crate::types::{ConnectorId, TaskId};
use serde::{Deserialize, Serialize};

/// Which entities of a connector a restart request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartScope {
    /// The connector and every one of its tasks
    All,
    /// Only entities whose last observed state is `Failed`
    OnlyFailed,
    /// The connector only, no tasks
    OnlyConnector,
}

/// A request to restart a connector and/or its tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRequest {
    pub connector: ConnectorId,
    pub scope: RestartScope,
}

impl RestartRequest {
    pub fn new(connector: impl Into<ConnectorId>, scope: RestartScope) -> Self {
        Self {
            connector: connector.into(),
            scope,
        }
    }
}

/// One-shot description of exactly what a restart request must stop and
/// restart. Built fresh per request from (snapshot, live status, scope);
/// consumed once and discarded.
#[derive(Debug, Clone)]
pub struct RestartPlan {
    pub connector: ConnectorId,
    restart_connector: bool,
    tasks_to_restart: Vec<TaskId>,
    total_task_count: usize,
}

impl RestartPlan {
    /// Compute the plan. Pure over its inputs: no worker or store calls, no
    /// side effects. Returns `None` when the connector has no status record.
    ///
    /// The caller is responsible for rejecting connectors absent from the
    /// snapshot before planning.
    pub fn build(
        request: &RestartRequest,
        snapshot: &ClusterConfigState,
        status: &StatusStore,
    ) -> Option<RestartPlan> {
        let connector_status = status.connector(&request.connector)?;

        let restart_connector = match request.scope {
            RestartScope::All | RestartScope::OnlyConnector => true,
            RestartScope::OnlyFailed => connector_status.state == LifecycleState::Failed,
        };

        let task_ids = snapshot.tasks(&request.connector);
        let total_task_count = task_ids.len();
        let tasks_to_restart = match request.scope {
            RestartScope::All => task_ids,
            RestartScope::OnlyConnector => Vec::new(),
            RestartScope::OnlyFailed => task_ids
                .into_iter()
                .filter(|id| {
                    status
                        .task(id)
                        .map(|s| s.state == LifecycleState::Failed)
                        .unwrap_or(false)
                })
                .collect(),
        };

        Some(RestartPlan {
            connector: request.connector.clone(),
            restart_connector,
            tasks_to_restart,
            total_task_count,
        })
    }

    pub fn should_restart_connector(&self) -> bool {
        self.restart_connector
    }

    pub fn should_restart_tasks(&self) -> bool {
        !self.tasks_to_restart.is_empty()
    }

    pub fn task_ids_to_restart(&self) -> &[TaskId] {
        &self.tasks_to_restart
    }

    pub fn restart_task_count(&self) -> usize {
        self.tasks_to_restart.len()
    }

    pub fn total_task_count(&self) -> usize {
        self.total_task_count
    }
}

impl std::fmt::Display for RestartPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "restart plan for {}: connector={}, tasks {}/{}",
            self.connector,
            self.restart_connector,
            self.restart_task_count(),
            self.total_task_count
        )
    }
}
