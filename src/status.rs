//! Live status records for connectors and tasks
//!
//! The worker reports observed lifecycle transitions here; the restart
//! planner reads them to select failed entities. In-memory only: standalone
//! mode has no durable status store.

use crate::types::{ConnectorId, TaskId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Last observed lifecycle state of a connector or task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Known but not yet started
    Unassigned,
    Running,
    Paused,
    Stopped,
    Failed,
    /// Stopped as part of an in-flight restart
    Restarting,
    /// Deleted; terminal
    Destroyed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unassigned => write!(f, "unassigned"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
            Self::Restarting => write!(f, "restarting"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Status record for a connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorStatus {
    pub state: LifecycleState,
    /// Error trace when `state` is `Failed`
    pub trace: Option<String>,
    /// Unix timestamp of the last transition
    pub updated_at: i64,
}

/// Status record for a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub state: LifecycleState,
    pub trace: Option<String>,
    pub updated_at: i64,
}

/// Point-in-time state summary for a connector and its tasks, returned by
/// the restart API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorStateInfo {
    pub name: ConnectorId,
    pub connector: LifecycleState,
    pub tasks: Vec<TaskStateInfo>,
}

/// Per-task entry of a [`ConnectorStateInfo`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStateInfo {
    pub id: TaskId,
    pub state: LifecycleState,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// In-memory store of last observed statuses.
#[derive(Default)]
pub struct StatusStore {
    connectors: RwLock<HashMap<ConnectorId, ConnectorStatus>>,
    tasks: RwLock<HashMap<TaskId, TaskStatus>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_connector(&self, name: &ConnectorId, state: LifecycleState, trace: Option<String>) {
        self.connectors.write().insert(
            name.clone(),
            ConnectorStatus {
                state,
                trace,
                updated_at: now(),
            },
        );
    }

    pub fn put_task(&self, id: &TaskId, state: LifecycleState, trace: Option<String>) {
        self.tasks.write().insert(
            id.clone(),
            TaskStatus {
                id: id.clone(),
                state,
                trace,
                updated_at: now(),
            },
        );
    }

    pub fn connector(&self, name: &ConnectorId) -> Option<ConnectorStatus> {
        self.connectors.read().get(name).cloned()
    }

    pub fn task(&self, id: &TaskId) -> Option<TaskStatus> {
        self.tasks.read().get(id).cloned()
    }

    /// Task statuses for a connector, ordered by task ordinal.
    pub fn tasks_for(&self, name: &ConnectorId) -> Vec<TaskStatus> {
        let mut out: Vec<TaskStatus> = self
            .tasks
            .read()
            .values()
            .filter(|s| &s.id.connector == name)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.id.task);
        out
    }

    /// Mark a connector as stopped for restart.
    pub fn on_connector_restart(&self, name: &ConnectorId) {
        self.put_connector(name, LifecycleState::Restarting, None);
    }

    /// Mark a task as stopped for restart.
    pub fn on_task_restart(&self, id: &TaskId) {
        self.put_task(id, LifecycleState::Restarting, None);
    }

    /// Record deletion of a task and forget it.
    pub fn on_task_deletion(&self, id: &TaskId) {
        self.tasks.write().remove(id);
    }

    /// Record deletion of a connector and forget it along with its tasks.
    pub fn on_connector_deletion(&self, name: &ConnectorId) {
        self.connectors.write().remove(name);
        self.tasks.write().retain(|id, _| &id.connector != name);
    }
}
