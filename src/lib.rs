//! # rivven-herder
//!
//! Single-process connector lifecycle orchestration.
//!
//! The herder owns the desired configuration of a set of connectors and
//! their tasks, keeps the live runtime state converged with it, and exposes
//! a small management API: create/update, delete, restart (immediate,
//! delayed, or planned across connector and tasks), pause/resume via target
//! states, and task reconfiguration.
//!
//! ```text
//!                 ┌─────────────────────────────────────────────┐
//!                 │              StandaloneHerder               │
//!   management    │  ┌─────────────────┐  ┌──────────────────┐  │
//!   API ────────▶ │  │RequestSerializer│  │  Arc<snapshot>   │  │
//!                 │  │ (single writer) │  │ (lock-free read) │  │
//!                 │  └────────┬────────┘  └────────▲─────────┘  │
//!                 └───────────┼───────────────────┼─────────────┘
//!                             │ start/stop        │ notify + refresh
//!                      ┌──────▼──────┐    ┌───────┴──────────┐
//!                      │   Worker    │    │ConfigBackingStore│
//!                      │  (runtime)  │    │    (durable)     │
//!                      └─────────────┘    └──────────────────┘
//! ```
//!
//! Every mutation runs on the [`request::RequestSerializer`], a single
//! logical writer, so per-connector transitions never interleave. Reads are
//! served from an immutable [`snapshot::ClusterConfigState`] behind an `Arc`
//! swap and never block on in-flight mutations.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use rivven_herder::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo(worker: Arc<dyn Worker>) -> HerderResult<()> {
//! let store = Arc::new(MemoryConfigBackingStore::new());
//! let herder = StandaloneHerder::new(worker, store);
//! herder.start();
//!
//! let mut config = RawConfig::new();
//! config.insert("connector.class".into(), "PostgresSource".into());
//! config.insert("tasks.max".into(), "2".into());
//!
//! let created = herder
//!     .put_connector_config("pg-source".into(), config, false)
//!     .await?;
//! assert!(created.created);
//!
//! herder.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod herder;
pub mod request;
pub mod restart;
pub mod snapshot;
pub mod status;
pub mod store;
pub mod testing;
pub mod types;
pub mod worker;

pub use error::{HerderError, HerderResult};
pub use herder::{ConnectorContext, StandaloneHerder};
pub use request::PendingRequest;
pub use restart::{RestartPlan, RestartRequest, RestartScope};
pub use snapshot::ClusterConfigState;
pub use status::{ConnectorStateInfo, ConnectorStatus, LifecycleState, StatusStore, TaskStatus};
pub use store::{ConfigBackingStore, ConfigUpdate, MemoryConfigBackingStore, UpdateListener};
pub use types::{
    ConnectorId, ConnectorInfo, Created, RawConfig, SessionKey, TargetState, TaskId, TaskInfo,
};
pub use worker::{Worker, WorkerError, WorkerResult};

/// Convenience re-exports for consumers of the herder API.
pub mod prelude {
    pub use crate::error::{HerderError, HerderResult};
    pub use crate::herder::{ConnectorContext, StandaloneHerder};
    pub use crate::restart::{RestartRequest, RestartScope};
    pub use crate::status::{ConnectorStateInfo, LifecycleState};
    pub use crate::store::{ConfigBackingStore, MemoryConfigBackingStore};
    pub use crate::types::{ConnectorId, ConnectorInfo, Created, RawConfig, TargetState, TaskId};
    pub use crate::worker::{Worker, WorkerError, WorkerResult};
}
