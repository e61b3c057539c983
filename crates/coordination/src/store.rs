use std::time::Duration;

use async_trait::async_trait;
use fleet_core::FleetResult;

/// Transport seam for the shared expiring key-value store. Workers only
/// ever write their own id-scoped keys; the dashboard reads across
/// workers through the same key layout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Cheap connectivity probe.
    async fn ping(&self) -> FleetResult<()>;

    /// Write a scalar record, optionally bounded by a TTL.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> FleetResult<()>;

    /// Read a scalar record; `None` when absent or expired.
    async fn get(&self, key: &str) -> FleetResult<Option<String>>;

    async fn add_to_set(&self, set_key: &str, member: &str) -> FleetResult<()>;

    async fn remove_from_set(&self, set_key: &str, member: &str) -> FleetResult<()>;

    async fn set_members(&self, set_key: &str) -> FleetResult<Vec<String>>;

    /// Append to a list key, refreshing its TTL. Lists are append-only
    /// and reaped wholesale by expiry.
    async fn append(&self, key: &str, value: &str, ttl: Duration) -> FleetResult<()>;

    async fn list(&self, key: &str) -> FleetResult<Vec<String>>;
}
