//! Immutable point-in-time view of all known connector and task configuration
//!
//! A [`ClusterConfigState`] is never mutated in place: the config backing
//! store builds a fresh one on every change and the herder swaps it in by
//! atomic `Arc` replacement. Readers clone the `Arc` and never need a lock.

use crate::types::{ConnectorId, RawConfig, TargetState, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full known configuration state: connectors, raw configs, target states,
/// and per-connector ordered task configs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfigState {
    connectors: BTreeMap<ConnectorId, RawConfig>,
    target_states: BTreeMap<ConnectorId, TargetState>,
    task_configs: BTreeMap<TaskId, RawConfig>,
}

impl ClusterConfigState {
    /// The empty state, used before the first store snapshot arrives.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, connector: &ConnectorId) -> bool {
        self.connectors.contains_key(connector)
    }

    /// Names of all known connectors, in deterministic order.
    pub fn connectors(&self) -> Vec<ConnectorId> {
        self.connectors.keys().cloned().collect()
    }

    pub fn connector_config(&self, connector: &ConnectorId) -> Option<&RawConfig> {
        self.connectors.get(connector)
    }

    /// Desired run mode for a connector; defaults to `Started` for known
    /// connectors without an explicit record.
    pub fn target_state(&self, connector: &ConnectorId) -> TargetState {
        self.target_states
            .get(connector)
            .copied()
            .unwrap_or_default()
    }

    /// Ordered task ids for a connector.
    pub fn tasks(&self, connector: &ConnectorId) -> Vec<TaskId> {
        self.task_configs
            .keys()
            .filter(|id| &id.connector == connector)
            .cloned()
            .collect()
    }

    pub fn task_config(&self, id: &TaskId) -> Option<&RawConfig> {
        self.task_configs.get(id)
    }

    /// All task configs for a connector in task-ordinal order; the structural
    /// comparison input for reconciliation.
    pub fn all_task_configs(&self, connector: &ConnectorId) -> Vec<RawConfig> {
        self.task_configs
            .iter()
            .filter(|(id, _)| &id.connector == connector)
            .map(|(_, cfg)| cfg.clone())
            .collect()
    }

    pub fn task_count(&self, connector: &ConnectorId) -> usize {
        self.task_configs
            .keys()
            .filter(|id| &id.connector == connector)
            .count()
    }

    // Builder-style mutators used by the backing store when deriving the next
    // snapshot. Not public: snapshots held by the herder are immutable.

    pub(crate) fn set_connector_config(&mut self, connector: ConnectorId, config: RawConfig) {
        self.connectors.insert(connector, config);
    }

    pub(crate) fn remove_connector(&mut self, connector: &ConnectorId) {
        self.connectors.remove(connector);
        self.target_states.remove(connector);
        self.task_configs.retain(|id, _| &id.connector != connector);
    }

    pub(crate) fn set_target_state(&mut self, connector: ConnectorId, state: TargetState) {
        self.target_states.insert(connector, state);
    }

    pub(crate) fn set_task_configs(&mut self, connector: &ConnectorId, configs: Vec<RawConfig>) {
        self.task_configs.retain(|id, _| &id.connector != connector);
        for (ordinal, config) in configs.into_iter().enumerate() {
            self.task_configs
                .insert(TaskId::new(connector.clone(), ordinal as u32), config);
        }
    }

    pub(crate) fn remove_task_configs(&mut self, connector: &ConnectorId) {
        self.task_configs.retain(|id, _| &id.connector != connector);
    }
}
