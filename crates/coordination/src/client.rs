use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::{CircuitBreaker, CircuitBreakerConfig, FleetError, FleetResult, StoreConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::store::CoordinationStore;

/// Typed, retrying operations over the coordination store.
///
/// Every operation runs under bounded retry (3 attempts, doubling
/// backoff) and a circuit breaker per operation class. Once the store
/// misbehaves for long enough the breaker opens and calls fail
/// immediately with `StoreUnavailable` — the worker degrades to
/// locally-healthy-but-fleet-invisible instead of stalling request
/// handling on network timeouts.
pub struct StoreClient {
    store: Arc<dyn CoordinationStore>,
    config: StoreConfig,
    read_breaker: CircuitBreaker,
    write_breaker: CircuitBreaker,
    set_breaker: CircuitBreaker,
}

impl StoreClient {
    pub fn new(store: Arc<dyn CoordinationStore>, config: StoreConfig) -> Self {
        // Leave headroom for the full retry schedule inside one breaker
        // call.
        let breaker_config = CircuitBreakerConfig {
            call_timeout: Duration::from_secs(30),
            ..CircuitBreakerConfig::default()
        };
        Self::with_breaker_config(store, config, breaker_config)
    }

    pub fn with_breaker_config(
        store: Arc<dyn CoordinationStore>,
        config: StoreConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            store,
            config,
            read_breaker: CircuitBreaker::with_config("store-reads", breaker_config.clone()),
            write_breaker: CircuitBreaker::with_config("store-writes", breaker_config.clone()),
            set_breaker: CircuitBreaker::with_config("store-sets", breaker_config),
        }
    }

    /// Bounded retry: 3 attempts with 0.5s/1s/2s backoff by default.
    async fn retry_op<T, F, Fut>(&self, op_name: &str, mut operation: F) -> FleetResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FleetResult<T>>,
    {
        let mut backoff = self.config.retry_backoff();
        let mut last_error = None;
        for attempt in 1..=self.config.max_retry_attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Store operation {} recovered on attempt {}", op_name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt < self.config.max_retry_attempts {
                        warn!(
                            "Store operation {} failed (attempt {}/{}): {}. Retrying in {:?}",
                            op_name, attempt, self.config.max_retry_attempts, e, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(FleetError::store_unavailable(format!(
            "{op_name} failed after {} attempts: {}",
            self.config.max_retry_attempts,
            last_error.map_or_else(|| "unknown".to_string(), |e| e.to_string())
        )))
    }

    pub async fn ping(&self) -> FleetResult<()> {
        self.read_breaker
            .execute(|| self.retry_op("ping", || self.store.ping()))
            .await
    }

    /// Write a serialized record under `key`, bounded by `ttl`.
    pub async fn register<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> FleetResult<()> {
        let payload = serde_json::to_string(value)?;
        self.write_breaker
            .execute(|| self.retry_op("register", || self.store.put(key, &payload, ttl)))
            .await
    }

    /// Read and deserialize a record; absent or expired keys are `None`.
    pub async fn get_record<T: DeserializeOwned>(&self, key: &str) -> FleetResult<Option<T>> {
        let raw = self
            .read_breaker
            .execute(|| self.retry_op("get", || self.store.get(key)))
            .await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn add_to_set(&self, set_key: &str, member: &str) -> FleetResult<()> {
        self.set_breaker
            .execute(|| self.retry_op("add_to_set", || self.store.add_to_set(set_key, member)))
            .await
    }

    pub async fn remove_from_set(&self, set_key: &str, member: &str) -> FleetResult<()> {
        self.set_breaker
            .execute(|| {
                self.retry_op("remove_from_set", || {
                    self.store.remove_from_set(set_key, member)
                })
            })
            .await
    }

    pub async fn list_set(&self, set_key: &str) -> FleetResult<Vec<String>> {
        self.read_breaker
            .execute(|| self.retry_op("list_set", || self.store.set_members(set_key)))
            .await
    }

    /// Append a serialized event to a TTL-bounded list key.
    pub async fn append_event<T: Serialize + Sync>(
        &self,
        key: &str,
        event: &T,
        ttl: Duration,
    ) -> FleetResult<()> {
        let payload = serde_json::to_string(event)?;
        self.write_breaker
            .execute(|| self.retry_op("append_event", || self.store.append(key, &payload, ttl)))
            .await
    }

    /// Read every event in a list key, skipping entries that fail to
    /// parse (a newer worker may have mirrored a newer schema).
    pub async fn list_events<T: DeserializeOwned>(&self, key: &str) -> FleetResult<Vec<T>> {
        let raw = self
            .read_breaker
            .execute(|| self.retry_op("list_events", || self.store.list(key)))
            .await?;
        let mut events = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_str(&item) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping unparseable event in {}: {}", key, e),
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::store::MockCoordinationStore;
    use fleet_core::models::WorkerRecord;

    fn fast_config() -> StoreConfig {
        StoreConfig {
            url: "memory://".to_string(),
            max_retry_attempts: 3,
            retry_backoff_ms: 5,
        }
    }

    fn fast_breaker() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            cool_down: Duration::from_millis(100),
            call_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn typed_records_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let client = StoreClient::new(store, fast_config());

        let record = WorkerRecord::new("w1", "node-a");
        client
            .register("registry:heartbeat:w1", &record, Some(Duration::from_secs(60)))
            .await
            .unwrap();

        let loaded: Option<WorkerRecord> =
            client.get_record("registry:heartbeat:w1").await.unwrap();
        assert_eq!(loaded.unwrap().worker_id, "w1");
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mut mock = MockCoordinationStore::new();
        mock.expect_get()
            .times(2)
            .returning(|_| Err(FleetError::store_unavailable("flaky")));
        mock.expect_get()
            .times(1)
            .returning(|_| Ok(Some("{\"worker_id\":\"w1\",\"hostname\":\"h\",\"last_seen\":\"2026-01-01T00:00:00Z\"}".to_string())));

        let client = StoreClient::new(Arc::new(mock), fast_config());
        let record: Option<WorkerRecord> = client.get_record("k").await.unwrap();
        assert_eq!(record.unwrap().hostname, "h");
    }

    #[tokio::test]
    async fn exhausted_retries_surface_store_unavailable() {
        let mut mock = MockCoordinationStore::new();
        mock.expect_ping()
            .times(3)
            .returning(|| Err(FleetError::store_unavailable("down")));

        let client = StoreClient::new(Arc::new(mock), fast_config());
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, FleetError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_without_transport_io() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let client =
            StoreClient::with_breaker_config(store.clone(), fast_config(), fast_breaker());

        // 5 failed operations (each 3 transport attempts) open the
        // write breaker.
        for _ in 0..5 {
            let _ = client
                .register("k", &"v", Some(Duration::from_secs(1)))
                .await;
        }
        let transport_calls = store.transport_calls();
        assert_eq!(transport_calls, 15);

        // While open, calls fail immediately and never reach transport.
        let err = client
            .register("k", &"v", Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::StoreUnavailable(_)));
        assert_eq!(store.transport_calls(), transport_calls);
    }

    #[tokio::test]
    async fn breaker_recovers_after_cool_down_probe() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let client =
            StoreClient::with_breaker_config(store.clone(), fast_config(), fast_breaker());

        for _ in 0..5 {
            let _ = client.ping().await;
        }
        assert!(client.ping().await.is_err());

        store.set_unavailable(false);
        tokio::time::sleep(Duration::from_millis(150)).await;

        // The single half-open probe succeeds and closes the circuit.
        assert!(client.ping().await.is_ok());
        assert!(client.ping().await.is_ok());
    }

    #[tokio::test]
    async fn operation_classes_fail_independently() {
        let mut mock = MockCoordinationStore::new();
        mock.expect_put()
            .returning(|_, _, _| Err(FleetError::store_unavailable("writes down")));
        mock.expect_set_members()
            .returning(|_| Ok(vec!["w1".to_string()]));

        let client = StoreClient::with_breaker_config(
            Arc::new(mock),
            fast_config(),
            fast_breaker(),
        );

        // Open the write breaker.
        for _ in 0..5 {
            let _ = client.register("k", &"v", None).await;
        }

        // Reads still flow.
        let members = client.list_set("registry:active_workers").await.unwrap();
        assert_eq!(members, vec!["w1".to_string()]);
    }

    #[tokio::test]
    async fn unparseable_events_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        store
            .append("stats:w1:completed", "not-json", Duration::from_secs(60))
            .await
            .unwrap();
        store
            .append(
                "stats:w1:completed",
                "{\"worker_id\":\"w1\",\"hostname\":\"h\",\"last_seen\":\"2026-01-01T00:00:00Z\"}",
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let client = StoreClient::new(store, fast_config());
        let events: Vec<WorkerRecord> =
            client.list_events("stats:w1:completed").await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
