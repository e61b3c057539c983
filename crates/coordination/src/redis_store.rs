use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{FleetError, FleetResult, StoreConfig};
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::store::CoordinationStore;

/// Redis-backed coordination store. The connection manager reconnects
/// transparently; command failures surface as `StoreUnavailable` and are
/// absorbed by the retry/breaker layers above.
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(config: &StoreConfig) -> FleetResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            FleetError::store_unavailable(format!("invalid store url {}: {e}", config.url))
        })?;
        let connection = client.get_connection_manager().await.map_err(|e| {
            FleetError::store_unavailable(format!("failed to connect to {}: {e}", config.url))
        })?;
        debug!("Connected to coordination store at {}", config.url);
        Ok(Self { connection })
    }

    async fn run<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> FleetResult<T> {
        let mut connection = self.connection.clone();
        cmd.query_async(&mut connection)
            .await
            .map_err(|e| FleetError::store_unavailable(format!("redis command failed: {e}")))
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn ping(&self) -> FleetResult<()> {
        let response: String = self.run(&redis::cmd("PING")).await?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(FleetError::store_unavailable(format!(
                "unexpected PING response: {response}"
            )))
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> FleetResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        self.run::<()>(&cmd).await
    }

    async fn get(&self, key: &str) -> FleetResult<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run(&cmd).await
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> FleetResult<()> {
        let mut cmd = redis::cmd("SADD");
        cmd.arg(set_key).arg(member);
        self.run::<()>(&cmd).await
    }

    async fn remove_from_set(&self, set_key: &str, member: &str) -> FleetResult<()> {
        let mut cmd = redis::cmd("SREM");
        cmd.arg(set_key).arg(member);
        self.run::<()>(&cmd).await
    }

    async fn set_members(&self, set_key: &str) -> FleetResult<Vec<String>> {
        let mut cmd = redis::cmd("SMEMBERS");
        cmd.arg(set_key);
        self.run(&cmd).await
    }

    async fn append(&self, key: &str, value: &str, ttl: Duration) -> FleetResult<()> {
        let mut push = redis::cmd("RPUSH");
        push.arg(key).arg(value);
        self.run::<()>(&push).await?;
        let mut expire = redis::cmd("EXPIRE");
        expire.arg(key).arg(ttl.as_secs().max(1));
        self.run::<()>(&expire).await
    }

    async fn list(&self, key: &str) -> FleetResult<Vec<String>> {
        let mut cmd = redis::cmd("LRANGE");
        cmd.arg(key).arg(0).arg(-1);
        self.run(&cmd).await
    }
}
