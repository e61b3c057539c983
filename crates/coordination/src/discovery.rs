use std::sync::Arc;

use fleet_core::keys;
use fleet_core::models::WorkerRecord;
use fleet_core::FleetResult;
use tracing::debug;

use crate::client::StoreClient;

/// Fleet discovery over the shared store. Liveness is the intersection
/// of set membership and an unexpired heartbeat record; entries whose
/// record has aged out are pruned from the set on the way through.
pub struct WorkerDiscovery {
    client: Arc<StoreClient>,
}

impl WorkerDiscovery {
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self { client }
    }

    /// Workers with a live heartbeat record, with their records.
    pub async fn live_workers(&self) -> FleetResult<Vec<WorkerRecord>> {
        let members = self.client.list_set(keys::ACTIVE_WORKERS_SET).await?;
        let mut live = Vec::with_capacity(members.len());
        for worker_id in members {
            match self
                .client
                .get_record::<WorkerRecord>(&keys::heartbeat(&worker_id))
                .await?
            {
                Some(record) => live.push(record),
                None => {
                    debug!("Pruning stale worker {} from active set", worker_id);
                    // Prune failures are harmless; the next pass retries.
                    let _ = self
                        .client
                        .remove_from_set(keys::ACTIVE_WORKERS_SET, &worker_id)
                        .await;
                }
            }
        }
        live.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(live)
    }

    /// Ids only, for callers that do not need the full records.
    pub async fn live_worker_ids(&self) -> FleetResult<Vec<String>> {
        Ok(self
            .live_workers()
            .await?
            .into_iter()
            .map(|r| r.worker_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::HeartbeatPublisher;
    use crate::memory_store::MemoryStore;
    use fleet_core::{HeartbeatConfig, StoreConfig};
    use std::time::Duration;

    fn client(store: Arc<MemoryStore>) -> Arc<StoreClient> {
        Arc::new(StoreClient::new(
            store,
            StoreConfig {
                url: "memory://".to_string(),
                max_retry_attempts: 1,
                retry_backoff_ms: 1,
            },
        ))
    }

    #[tokio::test]
    async fn only_workers_with_live_records_are_discovered() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store.clone());
        let config = HeartbeatConfig {
            interval_seconds: 1,
            ttl_seconds: 1,
        };

        let alive = HeartbeatPublisher::new("w-alive", client.clone(), config.clone());
        alive.publish_once().await.unwrap();

        // A worker that registered once and then went silent.
        client
            .add_to_set(keys::ACTIVE_WORKERS_SET, "w-silent")
            .await
            .unwrap();

        let discovery = WorkerDiscovery::new(client.clone());
        let ids = discovery.live_worker_ids().await.unwrap();
        assert_eq!(ids, vec!["w-alive".to_string()]);

        // The silent worker was pruned from the set.
        let members = client.list_set(keys::ACTIVE_WORKERS_SET).await.unwrap();
        assert_eq!(members, vec!["w-alive".to_string()]);
    }

    #[tokio::test]
    async fn expired_heartbeat_drops_worker_from_discovery() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store.clone());
        let publisher = HeartbeatPublisher::new(
            "w1",
            client.clone(),
            HeartbeatConfig {
                interval_seconds: 1,
                ttl_seconds: 1,
            },
        );
        publisher.publish_once().await.unwrap();

        let discovery = WorkerDiscovery::new(client.clone());
        assert_eq!(discovery.live_worker_ids().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(discovery.live_worker_ids().await.unwrap().is_empty());
    }
}
