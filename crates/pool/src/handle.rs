use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::resource::BrowserResource;

/// Pool tier a handle belongs to. A handle belongs to exactly one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// The single always-on handle kept warm to avoid cold-start latency.
    Permanent,
    /// Adaptively sized ready pool serving concurrent load.
    Hot,
    /// Idle handles awaiting destruction; never served.
    Cold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleHealth {
    Healthy,
    Unresponsive,
}

/// Wrapper around one live browser process. Exclusively owned by the
/// pool manager; all fields are mutated only under the pool lock.
pub struct ResourceHandle {
    pub id: Uuid,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub tier: Tier,
    pub busy: bool,
    pub health: HandleHealth,
    pub resource: Arc<dyn BrowserResource>,
}

impl ResourceHandle {
    pub fn new(tier: Tier, resource: Arc<dyn BrowserResource>) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_used_at: now,
            tier,
            busy: false,
            health: HandleHealth::Healthy,
            resource,
        }
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_used_at.elapsed()
    }

    pub fn is_available(&self) -> bool {
        !self.busy && self.health == HandleHealth::Healthy
    }
}
