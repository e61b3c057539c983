use std::sync::Arc;

use async_trait::async_trait;
use fleet_core::FleetResult;

/// One live browser-automation process, usable for one job at a time.
/// The automation protocol itself is opaque to the pool; it only needs
/// probe and destroy semantics.
#[async_trait]
pub trait BrowserResource: Send + Sync {
    /// Liveness probe. `false` means the process is unresponsive and
    /// must be destroyed.
    async fn probe(&self) -> bool;

    /// Tear the process down. Must be idempotent; the janitor may race
    /// a lease holder dropping its reference.
    async fn destroy(&self);
}

/// Collaborator supplied by the embedding process: knows how to launch
/// a fresh browser instance.
#[async_trait]
pub trait ResourceDriver: Send + Sync {
    async fn create(&self) -> FleetResult<Arc<dyn BrowserResource>>;
}
