//! Standalone herder: single-process connector lifecycle orchestration
//!
//! The herder keeps the worker's live connector/task state converged with the
//! durably persisted desired configuration. Every mutating operation funnels
//! through the request serializer, so at most one lifecycle transition per
//! connector or task is ever in flight. Stop calls block the serializer until
//! the old runtime instance has released its resources; start calls run
//! arbitrary plugin code and are spawned off the serializer, with their
//! completions re-submitted before they touch shared state.
//!
//! The in-memory config store notifies synchronously on each durable write,
//! which lets an operation persist a change and immediately read it back from
//! a refreshed snapshot. The persist-before-start ordering in every start
//! path relies on this.

use crate::error::{HerderError, HerderResult};
use crate::request::{PendingRequest, RequestSerializer};
use crate::restart::{RestartPlan, RestartRequest};
use crate::snapshot::ClusterConfigState;
use crate::status::{ConnectorStateInfo, LifecycleState, StatusStore, TaskStateInfo};
use crate::store::{ConfigBackingStore, ConfigUpdate, UpdateListener};
use crate::types::{
    tasks_max, ConnectorId, ConnectorInfo, Created, RawConfig, TargetState, TaskId, TaskInfo,
};
use crate::worker::{Worker, WorkerResult};
use futures::Future;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// How long `stop()` waits for queued operations to drain before aborting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Handle given to a running connector instance so plugin code can call back
/// into the herder.
#[derive(Clone)]
pub struct ConnectorContext {
    inner: Weak<HerderInner>,
    connector: ConnectorId,
}

impl ConnectorContext {
    /// Ask the herder to recompute and converge this connector's task set.
    /// Fire-and-forget; a no-op once the herder is gone.
    pub fn request_task_reconfiguration(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.submit_task_reconfiguration(self.connector.clone());
        }
    }
}

impl std::fmt::Debug for ConnectorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorContext")
            .field("connector", &self.connector)
            .finish()
    }
}

/// Single-process orchestrator owning all connectors and tasks it manages.
#[derive(Clone)]
pub struct StandaloneHerder {
    inner: Arc<HerderInner>,
}

struct HerderInner {
    worker: Arc<dyn Worker>,
    config_store: Arc<dyn ConfigBackingStore>,
    status: Arc<StatusStore>,
    snapshot: RwLock<Arc<ClusterConfigState>>,
    serializer: RequestSerializer,
    running: AtomicBool,
}

impl StandaloneHerder {
    /// Create a herder over the given worker and config store and register
    /// as the store's update listener. Must be called within a tokio
    /// runtime: the request serializer spawns its consumer task here.
    pub fn new(worker: Arc<dyn Worker>, config_store: Arc<dyn ConfigBackingStore>) -> Self {
        let snapshot = Arc::new(config_store.snapshot());
        let inner = Arc::new(HerderInner {
            worker,
            config_store: config_store.clone(),
            status: Arc::new(StatusStore::new()),
            snapshot: RwLock::new(snapshot),
            serializer: RequestSerializer::new(),
            running: AtomicBool::new(false),
        });
        config_store.set_update_listener(Arc::new(ConfigUpdateListener {
            inner: Arc::downgrade(&inner),
        }));
        Self { inner }
    }

    pub fn start(&self) {
        info!("herder starting");
        self.inner.running.store(true, Ordering::SeqCst);
        info!("herder started");
    }

    /// Drain the request queue within a bounded grace period, then cleanly
    /// stop every remaining connector and its tasks. An operation aborted by
    /// the grace timeout may abandon its caller's completion; the loss is
    /// bounded to the final in-flight operation.
    pub async fn stop(&self) {
        info!("herder stopping");
        self.inner.serializer.shutdown(SHUTDOWN_GRACE).await;

        // No hand-off to another worker in standalone mode; just checkpoint
        // and shut down everything we own.
        for name in self.inner.snapshot().connectors() {
            self.inner.remove_connector_tasks(&name).await;
            if let Err(e) = self.inner.worker.stop_and_await_connector(&name).await {
                warn!(connector = %name, error = %e, "error stopping connector during shutdown");
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);
        info!("herder stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Standalone deployments have a single, permanent generation.
    pub fn generation(&self) -> u64 {
        0
    }

    /// Live status records, readable by transport layers and tests.
    pub fn status_store(&self) -> Arc<StatusStore> {
        self.inner.status.clone()
    }

    // =========================================================================
    // Reads (snapshot-only, no serialization needed)
    // =========================================================================

    pub fn connectors(&self) -> Vec<ConnectorId> {
        self.inner.snapshot().connectors()
    }

    pub fn connector_info(&self, name: &ConnectorId) -> HerderResult<ConnectorInfo> {
        self.inner
            .connector_info(name)
            .ok_or_else(|| HerderError::connector_not_found(name))
    }

    pub fn task_configs(&self, name: &ConnectorId) -> HerderResult<Vec<TaskInfo>> {
        let snapshot = self.inner.snapshot();
        if !snapshot.contains(name) {
            return Err(HerderError::connector_not_found(name));
        }
        Ok(snapshot
            .tasks(name)
            .into_iter()
            .map(|id| TaskInfo {
                config: snapshot.task_config(&id).cloned().unwrap_or_default(),
                id,
            })
            .collect())
    }

    /// Externally driven task assignment is a distributed-mode feature.
    pub fn put_task_configs(
        &self,
        _name: &ConnectorId,
        _configs: Vec<RawConfig>,
    ) -> HerderResult<()> {
        Err(HerderError::Unsupported(
            "externally supplied task configurations",
        ))
    }

    // =========================================================================
    // Mutations (serialized)
    // =========================================================================

    /// Create or replace a connector configuration.
    ///
    /// Validation runs before anything is enqueued; a rejected config causes
    /// no mutation. On success the config is durably persisted before the
    /// connector starts, and the initial task set is created once the start
    /// completes. A start failure surfaces here but leaves the persisted
    /// config in place for a later restart attempt.
    pub async fn put_connector_config(
        &self,
        name: ConnectorId,
        config: RawConfig,
        allow_replace: bool,
    ) -> HerderResult<Created<ConnectorInfo>> {
        let errors = self.inner.worker.validate_connector_config(&config).await?;
        if !errors.is_empty() {
            return Err(HerderError::validation(errors));
        }

        let (reply, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let submitted = self.inner.serializer.submit(async move {
            HerderInner::do_put_connector_config(inner, name, config, allow_replace, reply).await;
        });
        if !submitted {
            return Err(HerderError::ShuttingDown);
        }
        rx.await.map_err(|_| HerderError::ShuttingDown)?
    }

    /// Remove a connector: stop and forget its tasks (best-effort), stop the
    /// connector, remove the durable config, and run the deletion hook.
    /// Always completes to a terminal removed state.
    pub async fn delete_connector_config(
        &self,
        name: ConnectorId,
    ) -> HerderResult<Created<ConnectorInfo>> {
        let (reply, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let submitted = self.inner.serializer.submit(async move {
            let _ = reply.send(HerderInner::do_delete_connector_config(inner, name).await);
        });
        if !submitted {
            return Err(HerderError::ShuttingDown);
        }
        rx.await.map_err(|_| HerderError::ShuttingDown)?
    }

    /// Restart a connector: blocking stop, then async start. Resolves when
    /// the replacement instance has started (or failed to).
    pub async fn restart_connector(&self, name: ConnectorId) -> HerderResult<()> {
        let (reply, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let submitted = self.inner.serializer.submit(async move {
            HerderInner::do_restart_connector(inner, name, reply).await;
        });
        if !submitted {
            return Err(HerderError::ShuttingDown);
        }
        rx.await.map_err(|_| HerderError::ShuttingDown)?
    }

    /// Schedule a connector restart to run no earlier than `delay` from now.
    /// The returned handle cancels the restart if it has not yet begun; the
    /// restart outcome itself is logged.
    pub fn restart_connector_later(
        &self,
        delay: Duration,
        name: ConnectorId,
    ) -> HerderResult<PendingRequest> {
        let inner = self.inner.clone();
        self.inner
            .serializer
            .submit_delayed(delay, async move {
                let (reply, rx) = oneshot::channel();
                let log_name = name.clone();
                tokio::spawn(async move {
                    match rx.await {
                        Ok(Ok(())) => info!(connector = %log_name, "scheduled restart complete"),
                        Ok(Err(e)) => {
                            error!(connector = %log_name, error = %e, "scheduled restart failed")
                        }
                        Err(_) => {}
                    }
                });
                HerderInner::do_restart_connector(inner, name, reply).await;
            })
            .ok_or(HerderError::ShuttingDown)
    }

    /// Restart a single task from its persisted config.
    pub async fn restart_task(&self, id: TaskId) -> HerderResult<()> {
        let (reply, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let submitted = self.inner.serializer.submit(async move {
            let _ = reply.send(HerderInner::do_restart_task(inner, id).await);
        });
        if !submitted {
            return Err(HerderError::ShuttingDown);
        }
        rx.await.map_err(|_| HerderError::ShuttingDown)?
    }

    /// Plan and apply a restart of a connector and/or its tasks, returning a
    /// state summary for the restarted entities.
    pub async fn restart_connector_and_tasks(
        &self,
        request: RestartRequest,
    ) -> HerderResult<ConnectorStateInfo> {
        let (reply, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let submitted = self.inner.serializer.submit(async move {
            let _ = reply.send(HerderInner::do_restart_connector_and_tasks(inner, request).await);
        });
        if !submitted {
            return Err(HerderError::ShuttingDown);
        }
        rx.await.map_err(|_| HerderError::ShuttingDown)?
    }

    /// Fire-and-forget request to recompute a connector's task set.
    pub fn request_task_reconfiguration(&self, name: ConnectorId) {
        self.inner.submit_task_reconfiguration(name);
    }
}

impl HerderInner {
    fn snapshot(&self) -> Arc<ClusterConfigState> {
        self.snapshot.read().clone()
    }

    /// Atomically replace the held snapshot with a freshly fetched one. The
    /// only snapshot mutator, always driven by a store notification.
    fn refresh_snapshot(&self) {
        let fresh = Arc::new(self.config_store.snapshot());
        *self.snapshot.write() = fresh;
    }

    fn connector_info(&self, name: &ConnectorId) -> Option<ConnectorInfo> {
        let snapshot = self.snapshot();
        snapshot.connector_config(name).map(|config| ConnectorInfo {
            name: name.clone(),
            config: config.clone(),
            tasks: snapshot.tasks(name),
        })
    }

    fn submit_task_reconfiguration(self: &Arc<Self>, name: ConnectorId) {
        let inner = self.clone();
        self.serializer.submit(async move {
            if !inner.worker.connector_names().contains(&name) {
                error!(connector = %name, "connector requesting task reconfiguration does not exist");
                return;
            }
            inner.update_connector_tasks(&name).await;
        });
    }

    // =========================================================================
    // Serialized operations
    // =========================================================================

    async fn do_put_connector_config(
        inner: Arc<Self>,
        name: ConnectorId,
        config: RawConfig,
        allow_replace: bool,
        reply: oneshot::Sender<HerderResult<Created<ConnectorInfo>>>,
    ) {
        let exists = inner.snapshot().contains(&name);
        if exists && !allow_replace {
            let _ = reply.send(Err(HerderError::AlreadyExists(name)));
            return;
        }
        if exists {
            // The old instance must fully release its resources before the
            // replacement claims them.
            if let Err(e) = inner.worker.stop_and_await_connector(&name).await {
                warn!(connector = %name, error = %e, "error stopping previous connector instance, continuing");
            }
        }

        inner.config_store.put_connector_config(&name, config);
        let created = !exists;

        inner
            .clone()
            .spawn_start_connector(name.clone(), move |inner, result| async move {
                match result {
                    Ok(_) => {
                        inner.update_connector_tasks(&name).await;
                        let info = inner.connector_info(&name);
                        let _ = reply.send(Ok(Created::new(created, info)));
                    }
                    Err(e) => {
                        // The persisted config stays: eligible for a later
                        // restart or reconciliation attempt.
                        let _ = reply.send(Err(e.into()));
                    }
                }
            });
    }

    async fn do_delete_connector_config(
        inner: Arc<Self>,
        name: ConnectorId,
    ) -> HerderResult<Created<ConnectorInfo>> {
        if !inner.snapshot().contains(&name) {
            return Err(HerderError::connector_not_found(&name));
        }

        inner.remove_connector_tasks(&name).await;
        if let Err(e) = inner.worker.stop_and_await_connector(&name).await {
            warn!(connector = %name, error = %e, "error stopping connector, continuing with removal");
        }
        inner.config_store.remove_connector_config(&name);
        inner.status.on_connector_deletion(&name);
        info!(connector = %name, "connector removed");
        Ok(Created::new(false, None))
    }

    async fn do_restart_connector(
        inner: Arc<Self>,
        name: ConnectorId,
        reply: oneshot::Sender<HerderResult<()>>,
    ) {
        if !inner.snapshot().contains(&name) {
            let _ = reply.send(Err(HerderError::connector_not_found(&name)));
            return;
        }
        if let Err(e) = inner.worker.stop_and_await_connector(&name).await {
            warn!(connector = %name, error = %e, "error stopping connector before restart, continuing");
        }
        inner.clone().spawn_start_connector(name, move |_inner, result| async move {
            let _ = reply.send(result.map(|_| ()).map_err(Into::into));
        });
    }

    async fn do_restart_task(inner: Arc<Self>, id: TaskId) -> HerderResult<()> {
        let snapshot = inner.snapshot();
        if !snapshot.contains(&id.connector) {
            return Err(HerderError::connector_not_found(&id.connector));
        }
        let task_config = snapshot
            .task_config(&id)
            .cloned()
            .ok_or_else(|| HerderError::task_not_found(&id))?;
        let connector_config = snapshot
            .connector_config(&id.connector)
            .cloned()
            .unwrap_or_default();
        let target = snapshot.target_state(&id.connector);

        if let Err(e) = inner.worker.stop_and_await_task(&id).await {
            warn!(task = %id, error = %e, "error stopping task before restart, continuing");
        }
        inner
            .worker
            .start_task(
                &id,
                snapshot,
                connector_config,
                task_config,
                inner.status.clone(),
                target,
            )
            .await?;
        Ok(())
    }

    async fn do_restart_connector_and_tasks(
        inner: Arc<Self>,
        request: RestartRequest,
    ) -> HerderResult<ConnectorStateInfo> {
        let name = request.connector.clone();
        let snapshot = inner.snapshot();
        if !snapshot.contains(&name) {
            return Err(HerderError::connector_not_found(&name));
        }
        let plan = RestartPlan::build(&request, &snapshot, &inner.status).ok_or_else(|| {
            HerderError::NotFound(format!("status for connector {name}"))
        })?;
        info!("received {plan}");

        // Stop everything the plan selects, marking each entity restarting.
        // Stops are synchronous so the old instances have released their
        // resources before any replacement starts.
        if plan.should_restart_connector() {
            if let Err(e) = inner.worker.stop_and_await_connector(&name).await {
                warn!(connector = %name, error = %e, "error stopping connector for restart, continuing");
            }
            inner.status.on_connector_restart(&name);
        }
        if plan.should_restart_tasks() {
            if let Err(e) = inner.worker.stop_and_await_tasks(plan.task_ids_to_restart()).await {
                warn!(connector = %name, error = %e, "error stopping tasks for restart, continuing");
            }
            for id in plan.task_ids_to_restart() {
                inner.status.on_task_restart(id);
            }
        }

        // Now restart them.
        if plan.should_restart_connector() {
            debug!(connector = %name, "restarting connector");
            inner
                .clone()
                .spawn_start_connector(name.clone(), move |inner, result| async move {
                    match result {
                        Ok(_) => {
                            info!(connector = %name, "connector restart successful");
                            if inner.snapshot().target_state(&name) == TargetState::Started {
                                inner.update_connector_tasks(&name).await;
                            }
                        }
                        Err(e) => error!(connector = %name, error = %e, "connector restart failed"),
                    }
                });
        }
        if plan.should_restart_tasks() {
            debug!(
                connector = %plan.connector,
                restarting = plan.restart_task_count(),
                total = plan.total_task_count(),
                "restarting tasks"
            );
            inner
                .create_connector_tasks(&plan.connector, plan.task_ids_to_restart().to_vec())
                .await;
        }

        info!("completed {plan}");
        Ok(inner.restart_state_info(&plan))
    }

    // =========================================================================
    // Lifecycle driver
    // =========================================================================

    /// Start a connector asynchronously from its persisted config. The start
    /// may run slow plugin code, so it runs off the serializer; `on_start`
    /// is re-submitted to the serializer before touching shared state.
    fn spawn_start_connector<F, Fut>(self: Arc<Self>, name: ConnectorId, on_start: F)
    where
        F: FnOnce(Arc<HerderInner>, WorkerResult<TargetState>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let snapshot = self.snapshot();
            let config = snapshot.connector_config(&name).cloned().unwrap_or_default();
            let target = snapshot.target_state(&name);
            let ctx = ConnectorContext {
                inner: Arc::downgrade(&self),
                connector: name.clone(),
            };
            let result = self
                .worker
                .start_connector(&name, config, ctx, self.status.clone(), target)
                .await;
            let inner = self.clone();
            self.serializer.submit(async move {
                on_start(inner, result).await;
            });
        });
    }

    /// Start tasks from their already-persisted configs.
    async fn create_connector_tasks(&self, name: &ConnectorId, task_ids: Vec<TaskId>) {
        let snapshot = self.snapshot();
        let initial_state = snapshot.target_state(name);
        let connector_config = snapshot.connector_config(name).cloned().unwrap_or_default();
        for id in task_ids {
            let task_config = match snapshot.task_config(&id) {
                Some(config) => config.clone(),
                None => {
                    warn!(task = %id, "no persisted config for task, skipping start");
                    continue;
                }
            };
            if let Err(e) = self
                .worker
                .start_task(
                    &id,
                    snapshot.clone(),
                    connector_config.clone(),
                    task_config,
                    self.status.clone(),
                    initial_state,
                )
                .await
            {
                error!(task = %id, error = %e, "failed to start task");
            }
        }
    }

    /// Stop and forget every task of a connector. Best-effort: the tasks are
    /// forgotten even if a stop call errors.
    async fn remove_connector_tasks(&self, name: &ConnectorId) {
        let tasks = self.snapshot().tasks(name);
        if tasks.is_empty() {
            return;
        }
        if let Err(e) = self.worker.stop_and_await_tasks(&tasks).await {
            warn!(connector = %name, error = %e, "error stopping tasks, proceeding with removal");
        }
        self.config_store.remove_task_configs(name);
        for id in &tasks {
            self.status.on_task_deletion(id);
        }
    }

    // =========================================================================
    // Task reconciler
    // =========================================================================

    /// Recompute the desired task-config set and rebuild the running task
    /// set if it differs. Whole-set tear-down-and-rebuild: on any structural
    /// difference every task stops and the full new set starts from the
    /// persisted snapshot.
    async fn update_connector_tasks(&self, name: &ConnectorId) {
        // The connector may have been deleted while its start was in flight.
        if !self.snapshot().contains(name) {
            debug!(connector = %name, "skipping task reconfiguration for removed connector");
            return;
        }
        if !self.worker.is_running(name) {
            info!(connector = %name, "skipping task reconfiguration since the connector is not running");
            return;
        }

        let new_configs = match self.recompute_task_configs(name).await {
            Ok(configs) => configs,
            Err(e) => {
                error!(connector = %name, error = %e, "failed to recompute task configs");
                return;
            }
        };
        let old_configs = self.snapshot().all_task_configs(name);
        if new_configs == old_configs {
            debug!(connector = %name, "task configs unchanged");
            return;
        }

        self.remove_connector_tasks(name).await;
        self.config_store.put_task_configs(name, new_configs);
        let task_ids = self.snapshot().tasks(name);
        self.create_connector_tasks(name, task_ids).await;
    }

    async fn recompute_task_configs(&self, name: &ConnectorId) -> WorkerResult<Vec<RawConfig>> {
        let snapshot = self.snapshot();
        let config = snapshot.connector_config(name).cloned().unwrap_or_default();
        let max_tasks = tasks_max(&config);
        self.worker
            .connector_task_configs(name, &config, max_tasks)
            .await
    }

    fn restart_state_info(&self, plan: &RestartPlan) -> ConnectorStateInfo {
        let connector_state = if plan.should_restart_connector() {
            LifecycleState::Restarting
        } else {
            self.status
                .connector(&plan.connector)
                .map(|s| s.state)
                .unwrap_or(LifecycleState::Unassigned)
        };
        let tasks = self
            .snapshot()
            .tasks(&plan.connector)
            .into_iter()
            .map(|id| {
                let state = if plan.task_ids_to_restart().contains(&id) {
                    LifecycleState::Restarting
                } else {
                    self.status
                        .task(&id)
                        .map(|s| s.state)
                        .unwrap_or(LifecycleState::Unassigned)
                };
                TaskStateInfo { id, state }
            })
            .collect();
        ConnectorStateInfo {
            name: plan.connector.clone(),
            connector: connector_state,
            tasks,
        }
    }
}

/// Reacts to backing-store notifications: refreshes the snapshot on every
/// kind, and enqueues convergence work for target-state changes. Runs on the
/// store's notifying context, so anything touching shared state is handed to
/// the serializer.
struct ConfigUpdateListener {
    inner: Weak<HerderInner>,
}

impl UpdateListener for ConfigUpdateListener {
    fn on_update(&self, update: ConfigUpdate) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.refresh_snapshot();

        match update {
            ConfigUpdate::ConnectorConfig(_)
            | ConfigUpdate::ConnectorRemove(_)
            | ConfigUpdate::TaskConfigs(..) => {}
            ConfigUpdate::TargetState(name) => {
                let apply = inner.clone();
                inner.serializer.submit(async move {
                    let target = apply.snapshot().target_state(&name);
                    match apply.worker.set_target_state(&name, target).await {
                        Ok(TargetState::Started) => apply.update_connector_tasks(&name).await,
                        Ok(_) => {}
                        Err(e) => {
                            error!(connector = %name, target = %target, error = %e,
                                "failed to transition connector to target state");
                        }
                    }
                });
            }
            // Session keys secure distributed-mode internal requests.
            ConfigUpdate::SessionKey => {}
            // Restart requests recorded in the store are consumed by the
            // restart API, not the listener.
            ConfigUpdate::RestartRequest(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restart::RestartScope;
    use crate::store::MemoryConfigBackingStore;
    use crate::testing::{raw, MockWorker, WorkerEvent};

    fn herder_with(worker: Arc<MockWorker>) -> (StandaloneHerder, Arc<MemoryConfigBackingStore>) {
        let store = Arc::new(MemoryConfigBackingStore::new());
        let herder = StandaloneHerder::new(worker, store.clone());
        herder.start();
        (herder, store)
    }

    fn connector_config() -> RawConfig {
        raw(&[("connector.class", "DemoSource"), ("tasks.max", "2")])
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within timeout");
    }

    #[tokio::test]
    async fn test_put_connector_config_persists_and_starts() {
        let worker = Arc::new(
            MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")]), raw(&[("t", "1")])]),
        );
        let (herder, _store) = herder_with(worker.clone());

        let created = herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();
        assert!(created.created);
        let info = created.result.unwrap();
        assert_eq!(info.config, connector_config());
        assert_eq!(info.tasks.len(), 2);

        // The next snapshot contains the connector with the raw config
        let snapshot_info = herder.connector_info(&"c1".into()).unwrap();
        assert_eq!(snapshot_info.config, connector_config());

        let events = worker.events();
        let start_pos = events
            .iter()
            .position(|e| matches!(e, WorkerEvent::StartConnector(_)))
            .unwrap();
        assert!(events[..start_pos].contains(&WorkerEvent::Validate));
        assert_eq!(
            worker.count(|e| matches!(e, WorkerEvent::StartTask(_))),
            2
        );
    }

    #[tokio::test]
    async fn test_put_without_replace_on_existing_is_already_exists() {
        let worker = Arc::new(MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")])]));
        let (herder, store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();
        let before = store.snapshot();

        let err = herder
            .put_connector_config("c1".into(), raw(&[("connector.class", "Other")]), false)
            .await
            .unwrap_err();
        assert!(matches!(err, HerderError::AlreadyExists(_)));
        // Snapshot unchanged
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_put_with_replace_stops_old_instance_before_persisting() {
        let worker = Arc::new(MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")])]));
        let (herder, _store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();
        worker.clear_events();

        let created = herder
            .put_connector_config("c1".into(), raw(&[("connector.class", "DemoSource")]), true)
            .await
            .unwrap();
        assert!(!created.created);

        let events = worker.events();
        let stop = events
            .iter()
            .position(|e| matches!(e, WorkerEvent::StopConnector(_)))
            .unwrap();
        let start = events
            .iter()
            .position(|e| matches!(e, WorkerEvent::StartConnector(_)))
            .unwrap();
        assert!(stop < start);
    }

    #[tokio::test]
    async fn test_validation_failure_causes_no_mutation() {
        let worker = Arc::new(MockWorker::new().with_validation_errors(vec!["bad class".into()]));
        let (herder, store) = herder_with(worker.clone());

        let err = herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, HerderError::Validation { .. }));
        assert!(!store.snapshot().contains(&"c1".into()));
        assert_eq!(worker.count(|e| !matches!(e, WorkerEvent::Validate)), 0);
    }

    #[tokio::test]
    async fn test_start_failure_surfaces_but_config_stays_persisted() {
        let worker = Arc::new(
            MockWorker::new()
                .with_failing_connector_start("c1")
                .with_task_configs("c1", vec![raw(&[("t", "0")])]),
        );
        let (herder, store) = herder_with(worker.clone());

        let err = herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, HerderError::Worker(_)));
        // Persisted write is not rolled back; recoverable by a later restart
        assert!(store.snapshot().contains(&"c1".into()));
    }

    #[tokio::test]
    async fn test_delete_stops_each_task_once_and_removes_from_snapshot() {
        let worker = Arc::new(
            MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")]), raw(&[("t", "1")])]),
        );
        let (herder, store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();
        worker.clear_events();

        herder.delete_connector_config("c1".into()).await.unwrap();

        assert_eq!(
            worker.count(|e| matches!(e, WorkerEvent::StopTask(_))),
            2
        );
        assert_eq!(
            worker.count(|e| matches!(e, WorkerEvent::StopConnector(_))),
            1
        );
        let snapshot = store.snapshot();
        assert!(!snapshot.contains(&"c1".into()));
        assert_eq!(snapshot.task_count(&"c1".into()), 0);
        assert!(herder.connector_info(&"c1".into()).is_err());
        assert!(herder.status_store().connector(&"c1".into()).is_none());
    }

    #[tokio::test]
    async fn test_delete_unknown_connector_is_not_found() {
        let worker = Arc::new(MockWorker::new());
        let (herder, _store) = herder_with(worker.clone());
        let err = herder.delete_connector_config("ghost".into()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_reconfiguration_with_unchanged_configs_is_idempotent() {
        let configs = vec![raw(&[("t", "0")]), raw(&[("t", "1")])];
        let worker = Arc::new(MockWorker::new().with_task_configs("c1", configs));
        let (herder, _store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();
        worker.clear_events();

        herder.request_task_reconfiguration("c1".into());
        wait_until(|| {
            worker.count(|e| matches!(e, WorkerEvent::GenerateTaskConfigs(_))) == 1
        })
        .await;

        // Second call with no intervening config change: zero stop/start
        assert_eq!(worker.count(|e| matches!(e, WorkerEvent::StopTask(_))), 0);
        assert_eq!(worker.count(|e| matches!(e, WorkerEvent::StartTask(_))), 0);
    }

    #[tokio::test]
    async fn test_reconfiguration_with_changed_configs_rebuilds_whole_set() {
        let worker = Arc::new(
            MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")]), raw(&[("t", "1")])]),
        );
        let (herder, _store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();
        worker.clear_events();

        // New desired set of three different configs
        worker.set_task_configs(
            "c1",
            vec![raw(&[("t", "a")]), raw(&[("t", "b")]), raw(&[("t", "c")])],
        );
        herder.request_task_reconfiguration("c1".into());
        wait_until(|| worker.count(|e| matches!(e, WorkerEvent::StartTask(_))) == 3).await;

        let events = worker.events();
        let stops: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, WorkerEvent::StopTask(_)))
            .map(|(i, _)| i)
            .collect();
        let starts: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, WorkerEvent::StartTask(_)))
            .map(|(i, _)| i)
            .collect();
        // Exactly 2 stops, then exactly 3 starts, stops strictly before starts
        assert_eq!(stops.len(), 2);
        assert_eq!(starts.len(), 3);
        assert!(stops.iter().max() < starts.iter().min());
    }

    #[tokio::test]
    async fn test_reconfiguration_skipped_when_connector_not_running() {
        let worker = Arc::new(MockWorker::new());
        let (herder, _store) = herder_with(worker.clone());

        herder.request_task_reconfiguration("c1".into());
        // The request resolves without generating configs
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            worker.count(|e| matches!(e, WorkerEvent::GenerateTaskConfigs(_))),
            0
        );
    }

    #[tokio::test]
    async fn test_restart_unknown_connector_makes_no_worker_calls() {
        let worker = Arc::new(MockWorker::new());
        let (herder, _store) = herder_with(worker.clone());

        let err = herder
            .restart_connector_and_tasks(RestartRequest::new("ghost", RestartScope::All))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(worker.events().is_empty());
    }

    #[tokio::test]
    async fn test_restart_all_with_failed_tasks_restarts_everything() {
        let worker = Arc::new(
            MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")]), raw(&[("t", "1")])]),
        );
        let (herder, _store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();

        // All tasks last observed as failed
        let status = herder.status_store();
        status.put_connector(&"c1".into(), LifecycleState::Failed, Some("boom".into()));
        status.put_task(&TaskId::new("c1", 0), LifecycleState::Failed, None);
        status.put_task(&TaskId::new("c1", 1), LifecycleState::Failed, None);
        worker.clear_events();

        let state_info = herder
            .restart_connector_and_tasks(RestartRequest::new("c1", RestartScope::All))
            .await
            .unwrap();
        assert_eq!(state_info.connector, LifecycleState::Restarting);
        assert_eq!(state_info.tasks.len(), 2);
        assert!(state_info
            .tasks
            .iter()
            .all(|t| t.state == LifecycleState::Restarting));

        // Stops strictly precede starts
        wait_until(|| worker.count(|e| matches!(e, WorkerEvent::StartConnector(_))) == 1).await;
        let events = worker.events();
        let last_stop = events
            .iter()
            .rposition(|e| {
                matches!(e, WorkerEvent::StopTask(_) | WorkerEvent::StopConnector(_))
            })
            .unwrap();
        let first_start = events
            .iter()
            .position(|e| {
                matches!(e, WorkerEvent::StartTask(_) | WorkerEvent::StartConnector(_))
            })
            .unwrap();
        assert!(last_stop < first_start);
        assert_eq!(worker.count(|e| matches!(e, WorkerEvent::StartTask(_))), 2);
    }

    #[tokio::test]
    async fn test_restart_only_failed_tasks() {
        let worker = Arc::new(
            MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")]), raw(&[("t", "1")])]),
        );
        let (herder, _store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();
        let status = herder.status_store();
        status.put_task(&TaskId::new("c1", 1), LifecycleState::Failed, None);
        worker.clear_events();

        let state_info = herder
            .restart_connector_and_tasks(RestartRequest::new("c1", RestartScope::OnlyFailed))
            .await
            .unwrap();
        // Connector was Running, not failed: only task 1 restarts
        assert_ne!(state_info.connector, LifecycleState::Restarting);
        assert_eq!(
            worker.count(|e| matches!(e, WorkerEvent::StopTask(_))),
            1
        );
        assert_eq!(
            worker.count(|e| matches!(e, WorkerEvent::StopConnector(_))),
            0
        );
    }

    #[tokio::test]
    async fn test_restart_task_stops_then_starts() {
        let worker = Arc::new(MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")])]));
        let (herder, _store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();
        worker.clear_events();

        herder.restart_task(TaskId::new("c1", 0)).await.unwrap();
        assert_eq!(
            worker.events(),
            vec![
                WorkerEvent::StopTask(TaskId::new("c1", 0)),
                WorkerEvent::StartTask(TaskId::new("c1", 0)),
            ]
        );
    }

    #[tokio::test]
    async fn test_restart_unknown_task_is_not_found() {
        let worker = Arc::new(MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")])]));
        let (herder, _store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();

        let err = herder.restart_task(TaskId::new("c1", 9)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_delayed_restart_never_stops_connector() {
        let worker = Arc::new(MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")])]));
        let (herder, _store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();
        worker.clear_events();

        let handle = herder
            .restart_connector_later(Duration::from_millis(5000), "c1".into())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1000)).await;
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(
            worker.count(|e| matches!(e, WorkerEvent::StopConnector(_))),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_restart_executes_after_deadline() {
        let worker = Arc::new(MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")])]));
        let (herder, _store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();
        worker.clear_events();

        let _handle = herder
            .restart_connector_later(Duration::from_millis(5000), "c1".into())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(6000)).await;
        wait_until(|| worker.count(|e| matches!(e, WorkerEvent::StopConnector(_))) == 1).await;
    }

    #[tokio::test]
    async fn test_put_task_configs_is_unsupported() {
        let worker = Arc::new(MockWorker::new());
        let (herder, _store) = herder_with(worker);
        let err = herder
            .put_task_configs(&"c1".into(), vec![RawConfig::new()])
            .unwrap_err();
        assert!(matches!(err, HerderError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_concurrent_put_and_delete_resolve_to_one_order() {
        let worker = Arc::new(MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")])]));
        let (herder, store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();

        let put_herder = herder.clone();
        let put = tokio::spawn(async move {
            put_herder
                .put_connector_config("c1".into(), raw(&[("connector.class", "Updated")]), true)
                .await
        });
        let delete_herder = herder.clone();
        let delete = tokio::spawn(async move {
            delete_herder.delete_connector_config("c1".into()).await
        });

        let put_result = put.await.unwrap();
        let delete_result = delete.await.unwrap();

        // Both operations resolve to one serialized order; the final snapshot
        // matches whichever ran last and has no orphan task configs.
        let snapshot = store.snapshot();
        match snapshot.connector_config(&"c1".into()) {
            None => {
                assert!(delete_result.is_ok());
                assert_eq!(snapshot.task_count(&"c1".into()), 0);
            }
            Some(config) => {
                assert!(put_result.is_ok());
                assert_eq!(config, &raw(&[("connector.class", "Updated")]));
            }
        }
    }

    #[tokio::test]
    async fn test_target_state_change_applies_and_reconciles_when_started() {
        let worker = Arc::new(MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")])]));
        let (herder, store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();
        worker.clear_events();

        store.put_target_state(&"c1".into(), TargetState::Paused);
        wait_until(|| {
            worker.count(|e| matches!(e, WorkerEvent::SetTargetState(_, TargetState::Paused))) == 1
        })
        .await;
        // Paused: no reconciliation pass
        assert_eq!(
            worker.count(|e| matches!(e, WorkerEvent::GenerateTaskConfigs(_))),
            0
        );

        store.put_target_state(&"c1".into(), TargetState::Started);
        wait_until(|| {
            worker.count(|e| matches!(e, WorkerEvent::GenerateTaskConfigs(_))) == 1
        })
        .await;
    }

    #[tokio::test]
    async fn test_stop_shuts_down_remaining_connectors_and_tasks() {
        let worker = Arc::new(MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")])]));
        let (herder, _store) = herder_with(worker.clone());

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();
        worker.clear_events();

        herder.stop().await;
        assert!(!herder.is_running());
        assert_eq!(worker.count(|e| matches!(e, WorkerEvent::StopTask(_))), 1);
        assert_eq!(
            worker.count(|e| matches!(e, WorkerEvent::StopConnector(_))),
            1
        );

        // No new work accepted after shutdown
        let err = herder
            .restart_connector("c1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, HerderError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_task_configs_lists_persisted_configs() {
        let worker = Arc::new(
            MockWorker::new().with_task_configs("c1", vec![raw(&[("t", "0")]), raw(&[("t", "1")])]),
        );
        let (herder, _store) = herder_with(worker);

        herder
            .put_connector_config("c1".into(), connector_config(), false)
            .await
            .unwrap();

        let infos = herder.task_configs(&"c1".into()).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].id, TaskId::new("c1", 0));
        assert_eq!(infos[0].config, raw(&[("t", "0")]));

        assert!(herder.task_configs(&"nope".into()).is_err());
    }
}
