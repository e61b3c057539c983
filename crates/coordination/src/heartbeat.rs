use std::sync::Arc;

use fleet_core::keys;
use fleet_core::models::WorkerRecord;
use fleet_core::{FleetResult, HeartbeatConfig};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::client::StoreClient;

/// Periodic liveness publisher. Each beat rewrites the worker's
/// heartbeat record with a fresh TTL and re-adds the worker to the
/// active set, so a worker that lost its registration (store restart,
/// flushed keys) heals itself on the next beat.
pub struct HeartbeatPublisher {
    worker_id: String,
    hostname: String,
    client: Arc<StoreClient>,
    config: HeartbeatConfig,
}

impl HeartbeatPublisher {
    pub fn new(worker_id: impl Into<String>, client: Arc<StoreClient>, config: HeartbeatConfig) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            worker_id: worker_id.into(),
            hostname,
            client,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// One beat: refresh the TTL-bounded heartbeat record, then ensure
    /// set membership. A worker whose beats stop simply ages out.
    pub async fn publish_once(&self) -> FleetResult<()> {
        let record = WorkerRecord::new(&self.worker_id, &self.hostname);
        self.client
            .register(
                &keys::heartbeat(&self.worker_id),
                &record,
                Some(self.config.ttl()),
            )
            .await?;
        self.client
            .add_to_set(keys::ACTIVE_WORKERS_SET, &self.worker_id)
            .await?;
        debug!("Heartbeat published for worker {}", self.worker_id);
        Ok(())
    }

    /// Remove this worker from the active set. The heartbeat record is
    /// left to expire on its own.
    pub async fn deregister(&self) -> FleetResult<()> {
        self.client
            .remove_from_set(keys::ACTIVE_WORKERS_SET, &self.worker_id)
            .await?;
        info!("Worker {} deregistered from active set", self.worker_id);
        Ok(())
    }

    /// Run the beat loop until shutdown. The first beat fires
    /// immediately; failures are logged and the loop keeps going, so a
    /// store outage never takes the worker down with it.
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval());
            info!(
                "Heartbeat loop started for worker {} (interval {:?}, ttl {:?})",
                self.worker_id,
                self.config.interval(),
                self.config.ttl()
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.publish_once().await {
                            warn!("Heartbeat publish failed for worker {}: {}", self.worker_id, e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Heartbeat loop stopping for worker {}", self.worker_id);
                        break;
                    }
                }
            }
        })
    }
}
