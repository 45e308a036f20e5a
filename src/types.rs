//! Core identifier and configuration types shared across the herder

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw connector or task configuration: opaque string key/value pairs.
///
/// The herder only recognizes [`CONNECTOR_CLASS_CONFIG`] and
/// [`TASKS_MAX_CONFIG`]; everything else passes through to the plugin.
pub type RawConfig = BTreeMap<String, String>;

/// Config key naming the connector plugin class.
pub const CONNECTOR_CLASS_CONFIG: &str = "connector.class";

/// Config key hinting the maximum task parallelism for a connector.
pub const TASKS_MAX_CONFIG: &str = "tasks.max";

/// Default task parallelism when `tasks.max` is absent or unparseable.
pub const DEFAULT_TASKS_MAX: u32 = 1;

/// Connector identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectorId(pub String);

impl ConnectorId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Task identifier: the owning connector plus an ordinal giving a total
/// order within that connector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    pub connector: ConnectorId,
    pub task: u32,
}

impl TaskId {
    pub fn new(connector: impl Into<ConnectorId>, task: u32) -> Self {
        Self {
            connector: connector.into(),
            task,
        }
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.connector, self.task)
    }
}

/// Desired run mode for a connector and its tasks. Desired, not actual:
/// the live state converges toward this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    #[default]
    Started,
    Paused,
    Stopped,
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetState::Started => write!(f, "started"),
            TargetState::Paused => write!(f, "paused"),
            TargetState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Public description of a connector: its config and current task ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorInfo {
    pub name: ConnectorId,
    pub config: RawConfig,
    pub tasks: Vec<TaskId>,
}

/// Public description of a single task and its raw config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub config: RawConfig,
}

/// Result of a create-or-update mutation: whether a new entity was created,
/// and its description when one is available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created<T> {
    pub created: bool,
    pub result: Option<T>,
}

impl<T> Created<T> {
    pub fn new(created: bool, result: Option<T>) -> Self {
        Self { created, result }
    }
}

/// Session key for internal request signing. Rotation notifications reach
/// the herder but are a no-op in standalone mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    pub algorithm: String,
    pub key: Vec<u8>,
    pub created_at: i64,
}

/// Parse the declared task parallelism out of a connector config.
pub fn tasks_max(config: &RawConfig) -> u32 {
    config
        .get(TASKS_MAX_CONFIG)
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_TASKS_MAX)
}
