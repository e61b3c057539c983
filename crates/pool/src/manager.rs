use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use fleet_core::{FleetError, FleetResult, PoolConfig};
use tokio::sync::{Mutex, MutexGuard, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handle::{HandleHealth, ResourceHandle, Tier};
use crate::resource::{BrowserResource, ResourceDriver};

/// Snapshot of pool occupancy for health reporting.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub permanent_warmed: bool,
    pub permanent_busy: bool,
    pub hot_total: usize,
    pub hot_busy: usize,
    pub cold_total: usize,
    pub pending_creates: usize,
    pub created_total: u64,
    pub destroyed_total: u64,
}

struct PoolState {
    permanent: Option<ResourceHandle>,
    hot: Vec<ResourceHandle>,
    cold: Vec<ResourceHandle>,
    /// Hot-tier creations in flight, counted against `max_hot` so two
    /// concurrent acquires can never overshoot the bound.
    pending_creates: usize,
    created_total: u64,
    destroyed_total: u64,
}

/// Probe target handed to the janitor: the resource is cloned out so
/// liveness probes run outside the pool lock.
pub struct ProbeTarget {
    pub id: Uuid,
    pub tier: Tier,
    pub resource: Arc<dyn BrowserResource>,
}

/// Exclusive lease on one pooled handle, granted by `acquire` and
/// returned by `release`. Dropping an unreleased lease (an abandoned
/// acquire, a cancelled request) releases the handle in the background
/// so a handle is never left marked busy with no owner.
pub struct PoolLease {
    handle_id: Uuid,
    tier: Tier,
    resource: Arc<dyn BrowserResource>,
    pool: Weak<PoolManager>,
    released: bool,
}

impl PoolLease {
    pub fn handle_id(&self) -> Uuid {
        self.handle_id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn resource(&self) -> &Arc<dyn BrowserResource> {
        &self.resource
    }

    /// Return the handle to its tier. Never waits on capacity.
    pub async fn release(mut self) {
        self.released = true;
        if let Some(pool) = self.pool.upgrade() {
            pool.release_handle(self.handle_id).await;
        }
    }
}

impl fmt::Debug for PoolLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolLease")
            .field("handle_id", &self.handle_id)
            .field("tier", &self.tier)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            let id = self.handle_id;
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    pool.release_handle(id).await;
                });
            }
        }
    }
}

/// Owner of the Permanent/Hot/Cold tiers. All tier mutation is
/// serialized by one mutex acquired with a bounded wait; no I/O happens
/// under the lock (creation, destruction and probes all run outside it).
pub struct PoolManager {
    driver: Arc<dyn ResourceDriver>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    freed: Notify,
}

impl PoolManager {
    pub fn new(driver: Arc<dyn ResourceDriver>, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            driver,
            config,
            state: Mutex::new(PoolState {
                permanent: None,
                hot: Vec::new(),
                cold: Vec::new(),
                pending_creates: 0,
                created_total: 0,
                destroyed_total: 0,
            }),
            freed: Notify::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Bounded wait on the pool mutex. A stuck pool surfaces as a
    /// pool-timeout failure instead of silently blocking the caller.
    async fn lock_state(&self) -> FleetResult<MutexGuard<'_, PoolState>> {
        tokio::time::timeout(self.config.lock_timeout(), self.state.lock())
            .await
            .map_err(|_| FleetError::pool_timeout(self.config.lock_timeout()))
    }

    /// Create the single long-lived Permanent handle. Idempotent; must
    /// succeed before the worker can report Healthy.
    pub async fn warm_permanent(self: &Arc<Self>) -> FleetResult<()> {
        {
            let state = self.lock_state().await?;
            if state.permanent.is_some() {
                return Ok(());
            }
        }
        let started = Instant::now();
        let resource = self.driver.create().await?;
        let mut state = self.lock_state().await?;
        if state.permanent.is_some() {
            // Lost the race to a concurrent warm; discard ours outside the lock.
            drop(state);
            resource.destroy().await;
            return Ok(());
        }
        state.permanent = Some(ResourceHandle::new(Tier::Permanent, resource));
        state.created_total += 1;
        info!(
            "Permanent handle warmed in {}ms",
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Acquire a healthy, free handle. Preference order: free Hot or
    /// Permanent handle, then grow the Hot tier, then reclaim a Cold
    /// slot, minimizing cold-start latency. Fails with `PoolTimeout`
    /// once `timeout` elapses.
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> FleetResult<PoolLease> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for release notifications before checking, so a
            // release racing the check is never lost.
            let notified = self.freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.try_checkout().await? {
                return Ok(lease);
            }

            match self.try_grow().await {
                Ok(Some(lease)) => return Ok(lease),
                Ok(None) => {}
                Err(e) => {
                    // Creation failures are transient; pace the retry so a
                    // persistently failing driver cannot turn the wait into
                    // a create/fail spin (the freed slot notification wakes
                    // our own waiter immediately).
                    warn!("Hot tier growth failed during acquire: {}", e);
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(FleetError::pool_timeout(timeout));
                    }
                    tokio::time::sleep((deadline - now).min(Duration::from_millis(25))).await;
                    continue;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(FleetError::pool_timeout(timeout));
            }
            let remaining = deadline - now;
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(remaining) => {
                    return Err(FleetError::pool_timeout(timeout));
                }
            }
        }
    }

    /// Check out a free healthy handle from Hot or Permanent. Cold
    /// never serves acquisitions.
    async fn try_checkout(self: &Arc<Self>) -> FleetResult<Option<PoolLease>> {
        let mut state = self.lock_state().await?;

        if let Some(handle) = state.hot.iter_mut().find(|h| h.is_available()) {
            handle.busy = true;
            handle.last_used_at = Instant::now();
            let lease = Self::lease_for(self, handle);
            return Ok(Some(lease));
        }

        if let Some(handle) = state.permanent.as_mut().filter(|h| h.is_available()) {
            handle.busy = true;
            handle.last_used_at = Instant::now();
            let lease = Self::lease_for(self, handle);
            return Ok(Some(lease));
        }

        Ok(None)
    }

    /// Grow the Hot tier by one handle if under `max_hot`, reclaiming
    /// the oldest Cold handle first when one exists. Returns a busy
    /// lease on the fresh handle.
    async fn try_grow(self: &Arc<Self>) -> FleetResult<Option<PoolLease>> {
        let reclaimed = {
            let mut state = self.lock_state().await?;
            if state.hot.len() + state.pending_creates >= self.config.max_hot {
                return Ok(None);
            }
            state.pending_creates += 1;
            if state.cold.is_empty() {
                None
            } else {
                state.destroyed_total += 1;
                Some(state.cold.remove(0))
            }
        };

        if let Some(old) = reclaimed {
            debug!("Reclaiming cold handle {} before hot growth", old.id);
            old.resource.destroy().await;
        }

        let created = self.driver.create().await;

        let mut state = self.lock_state().await?;
        state.pending_creates = state.pending_creates.saturating_sub(1);
        match created {
            Ok(resource) => {
                let mut handle = ResourceHandle::new(Tier::Hot, resource);
                handle.busy = true;
                state.created_total += 1;
                let lease = Self::lease_for(self, &handle);
                debug!(
                    "Hot tier grew to {} handle(s) (max {})",
                    state.hot.len() + 1,
                    self.config.max_hot
                );
                state.hot.push(handle);
                Ok(Some(lease))
            }
            Err(e) => {
                drop(state);
                // Free the reserved slot for other waiters.
                self.freed.notify_waiters();
                Err(e)
            }
        }
    }

    fn lease_for(pool: &Arc<Self>, handle: &ResourceHandle) -> PoolLease {
        PoolLease {
            handle_id: handle.id,
            tier: handle.tier,
            resource: Arc::clone(&handle.resource),
            pool: Arc::downgrade(pool),
            released: false,
        }
    }

    /// Return a handle to its tier. Uses an unbounded (but short) lock
    /// wait: release must always resolve, including for leases dropped
    /// by callers that abandoned their acquire.
    pub(crate) async fn release_handle(&self, id: Uuid) {
        let mut state = self.state.lock().await;
        let PoolState { hot, permanent, .. } = &mut *state;
        let found = hot
            .iter_mut()
            .chain(permanent.as_mut())
            .find(|h| h.id == id);
        match found {
            Some(handle) => {
                handle.busy = false;
                handle.last_used_at = Instant::now();
            }
            None => {
                // Killed by the janitor while leased; nothing to return.
                debug!("Released handle {} no longer pooled", id);
            }
        }
        drop(state);
        self.freed.notify_waiters();
    }

    /// Explicitly add one free Hot handle, bounded by `max_hot`.
    pub async fn grow_hot(self: &Arc<Self>) -> FleetResult<bool> {
        {
            let mut state = self.lock_state().await?;
            if state.hot.len() + state.pending_creates >= self.config.max_hot {
                return Ok(false);
            }
            state.pending_creates += 1;
        }
        let created = self.driver.create().await;
        let mut state = self.lock_state().await?;
        state.pending_creates = state.pending_creates.saturating_sub(1);
        let resource = created?;
        state.hot.push(ResourceHandle::new(Tier::Hot, resource));
        state.created_total += 1;
        drop(state);
        self.freed.notify_waiters();
        Ok(true)
    }

    /// Demote the longest-idle free Hot handle to Cold.
    pub async fn shrink_hot(&self) -> FleetResult<bool> {
        let mut state = self.lock_state().await?;
        let candidate = state
            .hot
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.busy)
            .max_by_key(|(_, h)| h.idle_for())
            .map(|(i, _)| i);
        match candidate {
            Some(index) => {
                let mut handle = state.hot.remove(index);
                handle.tier = Tier::Cold;
                debug!("Demoted hot handle {} to cold", handle.id);
                state.cold.push(handle);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Move every free Hot handle idle past `threshold` to Cold.
    /// Returns the number demoted.
    pub async fn demote_idle_hot(&self, threshold: Duration) -> FleetResult<usize> {
        let mut state = self.lock_state().await?;
        let mut demoted = 0;
        let mut index = 0;
        while index < state.hot.len() {
            if !state.hot[index].busy && state.hot[index].idle_for() > threshold {
                let mut handle = state.hot.remove(index);
                handle.tier = Tier::Cold;
                debug!(
                    "Demoted hot handle {} to cold after {:?} idle",
                    handle.id,
                    handle.idle_for()
                );
                state.cold.push(handle);
                demoted += 1;
            } else {
                index += 1;
            }
        }
        Ok(demoted)
    }

    /// Remove Cold handles idle past `max_idle` and hand them to the
    /// caller for destruction outside the lock.
    pub async fn take_expired_cold(&self, max_idle: Duration) -> FleetResult<Vec<ResourceHandle>> {
        let mut state = self.lock_state().await?;
        let mut expired = Vec::new();
        let mut index = 0;
        while index < state.cold.len() {
            if state.cold[index].idle_for() > max_idle {
                expired.push(state.cold.remove(index));
            } else {
                index += 1;
            }
        }
        state.destroyed_total += expired.len() as u64;
        Ok(expired)
    }

    /// Clone out every Hot and Permanent resource for probing outside
    /// the pool lock.
    pub async fn probe_targets(&self) -> FleetResult<Vec<ProbeTarget>> {
        let state = self.lock_state().await?;
        let mut targets: Vec<ProbeTarget> = state
            .hot
            .iter()
            .map(|h| ProbeTarget {
                id: h.id,
                tier: Tier::Hot,
                resource: Arc::clone(&h.resource),
            })
            .collect();
        if let Some(handle) = state.permanent.as_ref() {
            targets.push(ProbeTarget {
                id: handle.id,
                tier: Tier::Permanent,
                resource: Arc::clone(&handle.resource),
            });
        }
        Ok(targets)
    }

    /// Force-remove a Hot handle that failed its liveness probe,
    /// regardless of idle time or busy state. The caller destroys the
    /// returned handle outside the lock.
    pub async fn remove_hot(&self, id: Uuid) -> FleetResult<Option<ResourceHandle>> {
        let mut state = self.lock_state().await?;
        let index = state.hot.iter().position(|h| h.id == id);
        let removed = index.map(|i| {
            let mut handle = state.hot.remove(i);
            handle.health = HandleHealth::Unresponsive;
            state.destroyed_total += 1;
            handle
        });
        drop(state);
        if removed.is_some() {
            self.freed.notify_waiters();
        }
        Ok(removed)
    }

    /// Destroy and synchronously recreate the Permanent handle. The new
    /// instance is created before the old one is swapped out, so the
    /// Permanent slot is never observed empty by a healthy worker.
    pub async fn recreate_permanent(self: &Arc<Self>) -> FleetResult<Uuid> {
        let resource = self.driver.create().await?;
        let replacement = ResourceHandle::new(Tier::Permanent, resource);
        let new_id = replacement.id;
        let old = {
            let mut state = self.lock_state().await?;
            let old = state.permanent.replace(replacement);
            state.created_total += 1;
            if old.is_some() {
                state.destroyed_total += 1;
            }
            old
        };
        if let Some(old) = old {
            info!("Replacing unresponsive permanent handle {}", old.id);
            old.resource.destroy().await;
        }
        self.freed.notify_waiters();
        Ok(new_id)
    }

    pub async fn stats(&self) -> FleetResult<PoolStats> {
        let state = self.lock_state().await?;
        Ok(PoolStats {
            permanent_warmed: state.permanent.is_some(),
            permanent_busy: state.permanent.as_ref().map(|h| h.busy).unwrap_or(false),
            hot_total: state.hot.len(),
            hot_busy: state.hot.iter().filter(|h| h.busy).count(),
            cold_total: state.cold.len(),
            pending_creates: state.pending_creates,
            created_total: state.created_total,
            destroyed_total: state.destroyed_total,
        })
    }
}
