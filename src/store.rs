//! Durable configuration store abstraction and its in-memory implementation
//!
//! The herder consumes the store through [`ConfigBackingStore`]: durable
//! writes return no value; completion is observed through the single
//! registered [`UpdateListener`]. The standalone deployment uses
//! [`MemoryConfigBackingStore`], which notifies synchronously on the mutating
//! call, so a write can be read back from a fresh snapshot immediately after
//! the mutator returns. The persist-before-start ordering in the herder
//! relies on exactly that contract.

use crate::snapshot::ClusterConfigState;
use crate::types::{ConnectorId, RawConfig, SessionKey, TargetState, TaskId};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Notification kinds emitted by the backing store after a durable write.
#[derive(Debug, Clone)]
pub enum ConfigUpdate {
    /// A connector config was added or replaced
    ConnectorConfig(ConnectorId),
    /// A connector config was removed
    ConnectorRemove(ConnectorId),
    /// A connector's task-config set was replaced
    TaskConfigs(ConnectorId, Vec<TaskId>),
    /// A connector's target state changed
    TargetState(ConnectorId),
    /// The session key was rotated
    SessionKey,
    /// A restart request was durably recorded
    RestartRequest(ConnectorId),
}

/// Receives store notifications on the store's own notifying context.
/// Implementations must hand off to the request serializer before touching
/// shared orchestrator state.
pub trait UpdateListener: Send + Sync {
    fn on_update(&self, update: ConfigUpdate);
}

/// Durable configuration persistence, consumed by the herder.
pub trait ConfigBackingStore: Send + Sync {
    /// Fetch a fresh immutable snapshot of the full configuration state.
    fn snapshot(&self) -> ClusterConfigState;

    fn put_connector_config(&self, connector: &ConnectorId, config: RawConfig);

    fn remove_connector_config(&self, connector: &ConnectorId);

    /// Replace the whole ordered task-config set for a connector.
    fn put_task_configs(&self, connector: &ConnectorId, configs: Vec<RawConfig>);

    fn remove_task_configs(&self, connector: &ConnectorId);

    fn put_target_state(&self, connector: &ConnectorId, state: TargetState);

    fn put_session_key(&self, key: SessionKey);

    fn put_restart_request(&self, connector: &ConnectorId);

    /// Register the store's single update listener. Exactly one listener per
    /// store instance; a second registration replaces the first.
    fn set_update_listener(&self, listener: Arc<dyn UpdateListener>);
}

/// In-memory backing store for the standalone deployment.
#[derive(Default)]
pub struct MemoryConfigBackingStore {
    state: Mutex<ClusterConfigState>,
    listener: Mutex<Option<Arc<dyn UpdateListener>>>,
}

impl MemoryConfigBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify outside the state lock so the listener can immediately call
    /// back into `snapshot()`.
    fn notify(&self, update: ConfigUpdate) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            debug!(?update, "config store notification");
            listener.on_update(update);
        }
    }
}

impl ConfigBackingStore for MemoryConfigBackingStore {
    fn snapshot(&self) -> ClusterConfigState {
        self.state.lock().clone()
    }

    fn put_connector_config(&self, connector: &ConnectorId, config: RawConfig) {
        self.state
            .lock()
            .set_connector_config(connector.clone(), config);
        self.notify(ConfigUpdate::ConnectorConfig(connector.clone()));
    }

    fn remove_connector_config(&self, connector: &ConnectorId) {
        self.state.lock().remove_connector(connector);
        self.notify(ConfigUpdate::ConnectorRemove(connector.clone()));
    }

    fn put_task_configs(&self, connector: &ConnectorId, configs: Vec<RawConfig>) {
        let tasks = {
            let mut state = self.state.lock();
            state.set_task_configs(connector, configs);
            state.tasks(connector)
        };
        self.notify(ConfigUpdate::TaskConfigs(connector.clone(), tasks));
    }

    fn remove_task_configs(&self, connector: &ConnectorId) {
        self.state.lock().remove_task_configs(connector);
        self.notify(ConfigUpdate::TaskConfigs(connector.clone(), Vec::new()));
    }

    fn put_target_state(&self, connector: &ConnectorId, state: TargetState) {
        self.state
            .lock()
            .set_target_state(connector.clone(), state);
        self.notify(ConfigUpdate::TargetState(connector.clone()));
    }

    fn put_session_key(&self, _key: SessionKey) {
        self.notify(ConfigUpdate::SessionKey);
    }

    fn put_restart_request(&self, connector: &ConnectorId) {
        self.notify(ConfigUpdate::RestartRequest(connector.clone()));
    }

    fn set_update_listener(&self, listener: Arc<dyn UpdateListener>) {
        *self.listener.lock() = Some(listener);
    }
}
