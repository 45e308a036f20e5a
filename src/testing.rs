//! Testing utilities for the herder
//!
//! Provides a recording [`MockWorker`] so orchestration logic can be tested
//! without plugin code or a live runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_herder::testing::*;
//!
//! #[tokio::test]
//! async fn test_put_starts_connector() {
//!     let worker = Arc::new(MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")])]));
//!     let store = Arc::new(MemoryConfigBackingStore::new());
//!     let herder = StandaloneHerder::new(worker.clone(), store);
//!     herder.start();
//!
//!     herder
//!         .put_connector_config("c1".into(), raw(&[("connector.class", "Demo")]), false)
//!         .await
//!         .unwrap();
//!
//!     assert!(worker.events().contains(&WorkerEvent::StartConnector("c1".into())));
//! }
//! ```

use crate::herder::ConnectorContext;
use crate::snapshot::ClusterConfigState;
use crate::status::{LifecycleState, StatusStore};
use crate::types::{ConnectorId, RawConfig, TargetState, TaskId};
use crate::worker::{Worker, WorkerError, WorkerResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Build a [`RawConfig`] from string pairs.
pub fn raw(pairs: &[(&str, &str)]) -> RawConfig {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// One observed worker call, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Validate,
    StartConnector(ConnectorId),
    StopConnector(ConnectorId),
    StartTask(TaskId),
    StopTask(TaskId),
    SetTargetState(ConnectorId, TargetState),
    GenerateTaskConfigs(ConnectorId),
}

/// A mock worker recording every call, with scriptable task-config
/// generation and failure injection.
#[derive(Default)]
pub struct MockWorker {
    events: Mutex<Vec<WorkerEvent>>,
    running: Mutex<HashSet<ConnectorId>>,
    task_configs: Mutex<HashMap<ConnectorId, Vec<RawConfig>>>,
    validation_errors: Mutex<Vec<String>>,
    fail_connector_start: Mutex<HashSet<ConnectorId>>,
    fail_task_start: Mutex<HashSet<TaskId>>,
}

impl MockWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the task-config sequence the generation hook returns for a
    /// connector.
    pub fn with_task_configs(self, connector: impl Into<ConnectorId>, configs: Vec<RawConfig>) -> Self {
        self.set_task_configs(connector, configs);
        self
    }

    /// Script validation to fail with the given messages.
    pub fn with_validation_errors(self, errors: Vec<String>) -> Self {
        *self.validation_errors.lock() = errors;
        self
    }

    /// Make the next start of a connector fail.
    pub fn with_failing_connector_start(self, connector: impl Into<ConnectorId>) -> Self {
        self.fail_connector_start.lock().insert(connector.into());
        self
    }

    /// Make starts of a task fail.
    pub fn with_failing_task_start(self, id: TaskId) -> Self {
        self.fail_task_start.lock().insert(id);
        self
    }

    /// Replace the scripted task configs after construction.
    pub fn set_task_configs(&self, connector: impl Into<ConnectorId>, configs: Vec<RawConfig>) {
        self.task_configs.lock().insert(connector.into(), configs);
    }

    /// Ordered record of every call observed so far.
    pub fn events(&self) -> Vec<WorkerEvent> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Count of recorded events matching a predicate.
    pub fn count(&self, pred: impl Fn(&WorkerEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    fn record(&self, event: WorkerEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl Worker for MockWorker {
    async fn validate_connector_config(&self, _config: &RawConfig) -> WorkerResult<Vec<String>> {
        self.record(WorkerEvent::Validate);
        Ok(self.validation_errors.lock().clone())
    }

    async fn start_connector(
        &self,
        name: &ConnectorId,
        _config: RawConfig,
        _ctx: ConnectorContext,
        status: Arc<StatusStore>,
        target: TargetState,
    ) -> WorkerResult<TargetState> {
        self.record(WorkerEvent::StartConnector(name.clone()));
        if self.fail_connector_start.lock().contains(name) {
            status.put_connector(name, LifecycleState::Failed, Some("injected failure".into()));
            return Err(WorkerError::connector_start(name, "injected failure"));
        }
        self.running.lock().insert(name.clone());
        status.put_connector(name, LifecycleState::Running, None);
        Ok(target)
    }

    async fn stop_and_await_connector(&self, name: &ConnectorId) -> WorkerResult<()> {
        self.record(WorkerEvent::StopConnector(name.clone()));
        self.running.lock().remove(name);
        Ok(())
    }

    async fn start_task(
        &self,
        id: &TaskId,
        _snapshot: Arc<ClusterConfigState>,
        _connector_config: RawConfig,
        _task_config: RawConfig,
        status: Arc<StatusStore>,
        _target: TargetState,
    ) -> WorkerResult<()> {
        self.record(WorkerEvent::StartTask(id.clone()));
        if self.fail_task_start.lock().contains(id) {
            status.put_task(id, LifecycleState::Failed, Some("injected failure".into()));
            return Err(WorkerError::task_start(id, "injected failure"));
        }
        status.put_task(id, LifecycleState::Running, None);
        Ok(())
    }

    async fn stop_and_await_task(&self, id: &TaskId) -> WorkerResult<()> {
        self.record(WorkerEvent::StopTask(id.clone()));
        Ok(())
    }

    async fn stop_and_await_tasks(&self, ids: &[TaskId]) -> WorkerResult<()> {
        for id in ids {
            self.record(WorkerEvent::StopTask(id.clone()));
        }
        Ok(())
    }

    fn is_running(&self, name: &ConnectorId) -> bool {
        self.running.lock().contains(name)
    }

    fn connector_names(&self) -> Vec<ConnectorId> {
        self.running.lock().iter().cloned().collect()
    }

    async fn set_target_state(
        &self,
        name: &ConnectorId,
        state: TargetState,
    ) -> WorkerResult<TargetState> {
        self.record(WorkerEvent::SetTargetState(name.clone(), state));
        Ok(state)
    }

    async fn connector_task_configs(
        &self,
        name: &ConnectorId,
        _connector_config: &RawConfig,
        max_tasks: u32,
    ) -> WorkerResult<Vec<RawConfig>> {
        self.record(WorkerEvent::GenerateTaskConfigs(name.clone()));
        if let Some(configs) = self.task_configs.lock().get(name) {
            return Ok(configs.clone());
        }
        Ok((0..max_tasks)
            .map(|i| raw(&[("task.id", &format!("{name}-{i}"))]))
            .collect())
    }
}
