use std::future::Future;
use std::sync::Arc;

use fleet_coordination::{
    CoordinationStore, HeartbeatPublisher, MonitoringRecorder, StoreClient,
};
use fleet_core::models::RequestOutcome;
use fleet_core::{FleetError, FleetResult, WorkerConfig};
use fleet_pool::{BrowserResource, Janitor, JanitorStatus, PoolManager, PoolStats, ResourceDriver};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::lifecycle::WorkerState;
use crate::state_store::{StateRecord, StateStore};

/// One browser fleet worker: tiered pool, janitor, heartbeat,
/// monitoring and the lifecycle state machine composed behind a
/// `start` / `execute` / `stop` surface.
///
/// Local request handling never depends on the coordination store:
/// store failures degrade fleet visibility and are absorbed by the
/// retry/breaker layers, while pool failures surface to the caller as
/// typed errors.
pub struct WorkerService {
    worker_id: String,
    config: WorkerConfig,
    pool: Arc<PoolManager>,
    heartbeat: Arc<HeartbeatPublisher>,
    recorder: Arc<MonitoringRecorder>,
    state: Mutex<WorkerState>,
    state_store: Option<StateStore>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerService {
    pub fn new(
        config: WorkerConfig,
        driver: Arc<dyn ResourceDriver>,
        store: Arc<dyn CoordinationStore>,
    ) -> FleetResult<Arc<Self>> {
        config.validate()?;
        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let pool = PoolManager::new(driver, config.pool.clone());
        let client = Arc::new(StoreClient::new(store, config.store.clone()));
        let heartbeat = Arc::new(HeartbeatPublisher::new(
            worker_id.clone(),
            Arc::clone(&client),
            config.heartbeat.clone(),
        ));
        let recorder = Arc::new(MonitoringRecorder::new(
            worker_id.clone(),
            client,
            config.monitoring.clone(),
        ));
        let state_store = config.state_file.clone().map(StateStore::new);
        let (shutdown_tx, _) = broadcast::channel(8);

        Ok(Arc::new(Self {
            worker_id,
            config,
            pool,
            heartbeat,
            recorder,
            state: Mutex::new(WorkerState::NotRunning),
            state_store,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.lock().await
    }

    pub async fn pool_stats(&self) -> FleetResult<PoolStats> {
        self.pool.stats().await
    }

    /// Bring the worker up: warm the Permanent handle, attempt the
    /// first heartbeat and start the background tasks. Heartbeat
    /// failure degrades visibility only and never blocks Healthy;
    /// Permanent warm failure drives the worker to Failed.
    pub async fn start(self: &Arc<Self>) -> FleetResult<()> {
        self.transition(WorkerState::Starting).await?;

        if let Err(e) = self.pool.warm_permanent().await {
            error!("Worker {} failed to warm permanent handle: {}", self.worker_id, e);
            if let Err(persist_err) = self.transition(WorkerState::Failed).await {
                error!("Worker {} failed to record Failed state: {}", self.worker_id, persist_err);
            }
            return Err(e);
        }

        if let Err(e) = self.heartbeat.publish_once().await {
            warn!(
                "Worker {} first heartbeat failed, continuing with degraded visibility: {}",
                self.worker_id, e
            );
        }

        self.transition(WorkerState::Healthy).await?;

        let (janitor, events_rx, status_rx) =
            Janitor::new(Arc::clone(&self.pool), self.config.janitor.clone());
        let mut tasks = self.tasks.lock().await;
        tasks.push(janitor.spawn(self.shutdown_tx.subscribe()));
        tasks.push(
            Arc::clone(&self.heartbeat).spawn(self.shutdown_tx.subscribe()),
        );
        tasks.push(
            Arc::clone(&self.recorder).spawn(self.shutdown_tx.subscribe()),
        );
        tasks.push(self.spawn_event_pipe(events_rx));
        tasks.push(self.spawn_health_monitor(status_rx));

        info!("Worker {} started", self.worker_id);
        Ok(())
    }

    /// Run one job against a pooled browser handle. Pool exhaustion
    /// surfaces as `PoolTimeout` so an external router can redirect;
    /// the handle is returned to its tier whatever the job outcome.
    pub async fn execute<T, F, Fut>(&self, endpoint: &str, job: F) -> FleetResult<T>
    where
        F: FnOnce(Arc<dyn BrowserResource>) -> Fut,
        Fut: Future<Output = FleetResult<T>>,
    {
        {
            let state = self.state.lock().await;
            if !state.admits_requests() {
                return Err(FleetError::Internal(format!(
                    "worker {} not admitting requests in state {}",
                    self.worker_id, *state
                )));
            }
        }
        self.mark_running().await?;

        let event = self.recorder.record_start(endpoint).await;
        let lease = match self
            .pool
            .acquire(self.config.pool.acquire_timeout())
            .await
        {
            Ok(lease) => lease,
            Err(e) => {
                self.recorder
                    .record_end(event.request_id, RequestOutcome::Error)
                    .await;
                return Err(e);
            }
        };

        let result = job(Arc::clone(lease.resource())).await;
        lease.release().await;

        let outcome = if result.is_ok() {
            RequestOutcome::Success
        } else {
            RequestOutcome::Error
        };
        self.recorder.record_end(event.request_id, outcome).await;
        result
    }

    /// Shut down: stop background tasks, leave the fleet and persist
    /// the terminal state. The heartbeat record ages out on its own.
    pub async fn stop(self: &Arc<Self>) -> FleetResult<()> {
        if self.state().await == WorkerState::Stopped {
            return Ok(());
        }
        info!("Worker {} stopping", self.worker_id);
        let _ = self.shutdown_tx.send(());
        for task in self.tasks.lock().await.drain(..) {
            let _ = task.await;
        }
        if let Err(e) = self.heartbeat.deregister().await {
            warn!("Worker {} failed to deregister: {}", self.worker_id, e);
        }
        self.transition(WorkerState::Stopped).await
    }

    /// First accepted request promotes Healthy to Running. Concurrent
    /// first requests race benignly: whoever holds the lock first
    /// transitions, the rest observe Running and pass through.
    async fn mark_running(&self) -> FleetResult<()> {
        let mut state = self.state.lock().await;
        if *state != WorkerState::Healthy {
            return Ok(());
        }
        self.apply_transition(&mut *state, WorkerState::Running).await
    }

    async fn transition(&self, to: WorkerState) -> FleetResult<()> {
        let mut state = self.state.lock().await;
        self.apply_transition(&mut *state, to).await
    }

    /// Apply and persist one lifecycle transition. A persistence
    /// failure is fatal: the worker moves to Failed and stops admitting.
    async fn apply_transition(
        &self,
        state: &mut WorkerState,
        to: WorkerState,
    ) -> FleetResult<()> {
        let next = state.checked_transition(to)?;
        if let Some(store) = &self.state_store {
            if let Err(e) = store
                .persist(&StateRecord::new(&self.worker_id, next))
                .await
            {
                error!(
                    "Worker {} could not persist state {}: {}",
                    self.worker_id, next, e
                );
                *state = WorkerState::Failed;
                let _ = store
                    .persist(&StateRecord::new(&self.worker_id, WorkerState::Failed))
                    .await;
                return Err(e);
            }
        }
        info!("Worker {} lifecycle {} -> {}", self.worker_id, *state, next);
        *state = next;
        Ok(())
    }

    /// Mirror janitor reclamation events into monitoring.
    fn spawn_event_pipe(
        self: &Arc<Self>,
        mut events_rx: mpsc::UnboundedReceiver<fleet_core::JanitorEvent>,
    ) -> JoinHandle<()> {
        let recorder = Arc::clone(&self.recorder);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_event = events_rx.recv() => match maybe_event {
                        Some(event) => recorder.record_janitor(&event).await,
                        None => break,
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    /// Periodic health evaluation from pool occupancy and janitor
    /// status: a missing Permanent handle, or a Cold tier above its
    /// high-water mark while janitor passes keep failing, marks the
    /// worker Unhealthy. Recovery returns it to Running.
    fn spawn_health_monitor(
        self: &Arc<Self>,
        status_rx: watch::Receiver<JanitorStatus>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.config.janitor.interval());
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let status = status_rx.borrow().clone();
                        service.evaluate_health(&status).await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    async fn evaluate_health(self: &Arc<Self>, status: &JanitorStatus) {
        let stats = match self.pool.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Worker {} health check could not read pool stats: {}", self.worker_id, e);
                return;
            }
        };
        let exhausted = stats.cold_total > self.config.pool.cold_high_water
            && status.consecutive_failed_passes >= self.config.janitor.missed_pass_threshold;
        let degraded = !stats.permanent_warmed || exhausted;

        let current = self.state().await;
        if degraded && matches!(current, WorkerState::Healthy | WorkerState::Running) {
            warn!(
                "Worker {} degraded (permanent_warmed={}, cold={}, failed_passes={})",
                self.worker_id, stats.permanent_warmed, stats.cold_total,
                status.consecutive_failed_passes
            );
            if let Err(e) = self.transition(WorkerState::Unhealthy).await {
                error!("Worker {} could not record Unhealthy: {}", self.worker_id, e);
            }
        } else if !degraded && current == WorkerState::Unhealthy {
            info!("Worker {} recovered", self.worker_id);
            if let Err(e) = self.transition(WorkerState::Running).await {
                error!("Worker {} could not record recovery: {}", self.worker_id, e);
            }
        }
    }
}
