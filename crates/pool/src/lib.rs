//! Tiered browser-resource pool: one always-warm Permanent handle, an
//! adaptively sized Hot tier and a destroy-only Cold tier, reclaimed by
//! a background janitor.

pub mod handle;
pub mod janitor;
pub mod manager;
pub mod resource;
pub mod testing;

pub use handle::{HandleHealth, ResourceHandle, Tier};
pub use janitor::{Janitor, JanitorStatus};
pub use manager::{PoolLease, PoolManager, PoolStats, ProbeTarget};
pub use resource::{BrowserResource, ResourceDriver};
