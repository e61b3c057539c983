use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use fleet_core::keys;
use fleet_core::models::{
    EndpointStats, ErrorEvent, JanitorEvent, RequestEvent, RequestOutcome,
};
use fleet_core::MonitoringConfig;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::StoreClient;

/// Request and reclamation telemetry for one worker.
///
/// Events land in a bounded local ring first; store mirrors are
/// best-effort and every mirrored key carries a TTL, so a dead worker's
/// telemetry ages out instead of accumulating forever. Aggregation
/// folds events deduplicated by request id, which makes republishing
/// the same event harmless.
pub struct MonitoringRecorder {
    worker_id: String,
    client: Arc<StoreClient>,
    config: MonitoringConfig,
    ring: Mutex<VecDeque<RequestEvent>>,
}

impl MonitoringRecorder {
    pub fn new(
        worker_id: impl Into<String>,
        client: Arc<StoreClient>,
        config: MonitoringConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            client,
            config,
            ring: Mutex::new(VecDeque::new()),
        }
    }

    /// Record the start of a request and mirror it into the in-flight
    /// key. Mirrors are append-only; a completed request supersedes its
    /// pending entry by request id on the read side, and the short
    /// active TTL reaps the rest.
    pub async fn record_start(&self, endpoint: impl Into<String>) -> RequestEvent {
        let event = RequestEvent::started(endpoint);
        {
            let mut ring = self.ring.lock().await;
            if ring.len() >= self.config.ring_capacity {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }
        if let Err(e) = self
            .client
            .append_event(
                &keys::active_requests(&self.worker_id),
                &event,
                Duration::from_secs(self.config.active_ttl_seconds),
            )
            .await
        {
            warn!("Failed to mirror active request {}: {}", event.request_id, e);
        }
        event
    }

    /// Record a request outcome. The ring entry is updated in place so
    /// the event keeps its original start time and request id.
    pub async fn record_end(&self, request_id: Uuid, outcome: RequestOutcome) {
        let finished = {
            let mut ring = self.ring.lock().await;
            ring.iter_mut()
                .find(|e| e.request_id == request_id)
                .map(|event| {
                    event.finish(outcome);
                    event.clone()
                })
        };
        let Some(event) = finished else {
            warn!("record_end for unknown request {}", request_id);
            return;
        };

        if let Err(e) = self
            .client
            .append_event(
                &keys::completed_requests(&self.worker_id),
                &event,
                Duration::from_secs(self.config.completed_ttl_seconds),
            )
            .await
        {
            warn!("Failed to mirror completed request {}: {}", request_id, e);
        }
        if outcome == RequestOutcome::Error {
            self.record_error(ErrorEvent::for_request(&event, "request failed"))
                .await;
        }
    }

    pub async fn record_janitor(&self, event: &JanitorEvent) {
        if let Err(e) = self
            .client
            .append_event(
                &keys::janitor_log(&self.worker_id),
                event,
                Duration::from_secs(self.config.janitor_ttl_seconds),
            )
            .await
        {
            warn!("Failed to mirror janitor event: {}", e);
        }
    }

    pub async fn record_error(&self, event: ErrorEvent) {
        if let Err(e) = self
            .client
            .append_event(
                &keys::error_log(&self.worker_id),
                &event,
                Duration::from_secs(self.config.errors_ttl_seconds),
            )
            .await
        {
            warn!("Failed to mirror error event: {}", e);
        }
    }

    /// Fold finished events into per-endpoint rollups, deduplicated by
    /// request id. Feeding the same event twice changes nothing.
    pub fn fold_events(events: &[RequestEvent]) -> HashMap<String, EndpointStats> {
        let mut seen = HashSet::new();
        let mut stats: HashMap<String, EndpointStats> = HashMap::new();
        for event in events {
            if !event.is_finished() || !seen.insert(event.request_id) {
                continue;
            }
            stats.entry(event.endpoint.clone()).or_default().record(event);
        }
        stats
    }

    /// Publish the per-endpoint rollup computed from the local ring.
    pub async fn flush(&self) {
        let events: Vec<RequestEvent> = {
            let ring = self.ring.lock().await;
            ring.iter().cloned().collect()
        };
        let rollup = Self::fold_events(&events);
        if rollup.is_empty() {
            return;
        }
        if let Err(e) = self
            .client
            .register(
                keys::ENDPOINT_AGGREGATE,
                &rollup,
                Some(Duration::from_secs(self.config.aggregate_ttl_seconds)),
            )
            .await
        {
            warn!("Failed to publish endpoint aggregate: {}", e);
        }
    }

    /// Periodic flush loop until shutdown; one final flush on the way
    /// out so the last window is not lost.
    pub fn spawn(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.flush_interval());
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.flush().await,
                    _ = shutdown_rx.recv() => {
                        info!("Monitoring flush loop stopping for worker {}", self.worker_id);
                        self.flush().await;
                        break;
                    }
                }
            }
        })
    }
}
