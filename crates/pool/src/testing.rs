//! Stub browser resources for tests. Kept in the library (not behind
//! `cfg(test)`) so downstream crates can exercise the pool without a
//! real browser process.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fleet_core::{FleetError, FleetResult};
use tokio::sync::Mutex;

use crate::resource::{BrowserResource, ResourceDriver};

/// Fake browser process with scriptable liveness.
pub struct StubResource {
    alive: AtomicBool,
    destroyed: AtomicBool,
}

impl StubResource {
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Simulate the browser process dying; the next probe fails.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Default for StubResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserResource for StubResource {
    async fn probe(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn destroy(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

/// Driver producing `StubResource`s; keeps every created instance so
/// tests can kill or inspect them later.
pub struct StubDriver {
    created: Mutex<Vec<Arc<StubResource>>>,
    created_count: AtomicUsize,
    create_attempts: AtomicUsize,
    fail_creates: AtomicBool,
}

impl StubDriver {
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            created_count: AtomicUsize::new(0),
            create_attempts: AtomicUsize::new(0),
            fail_creates: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `create` fail until re-enabled.
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn created_count(&self) -> usize {
        self.created_count.load(Ordering::SeqCst)
    }

    /// Every `create` call, including ones scripted to fail.
    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    pub fn destroyed_count(&self) -> usize {
        // Drained synchronously in tests; try_lock never contends there.
        self.created
            .try_lock()
            .map(|resources| resources.iter().filter(|r| r.is_destroyed()).count())
            .unwrap_or(0)
    }

    pub async fn created_resources(&self) -> Vec<Arc<StubResource>> {
        self.created.lock().await.clone()
    }
}

impl Default for StubDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDriver for StubDriver {
    async fn create(&self) -> FleetResult<Arc<dyn BrowserResource>> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(FleetError::resource_unhealthy(
                "stub driver configured to fail creation",
            ));
        }
        let resource = Arc::new(StubResource::new());
        self.created.lock().await.push(Arc::clone(&resource));
        self.created_count.fetch_add(1, Ordering::SeqCst);
        Ok(resource)
    }
}
