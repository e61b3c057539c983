use std::sync::Arc;
use std::time::Instant;

use fleet_core::{JanitorAction, JanitorConfig, JanitorEvent};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::handle::Tier;
use crate::manager::PoolManager;

/// Rolling summary of janitor activity, published after every pass so
/// the lifecycle health check can detect sustained reclamation failure.
#[derive(Debug, Clone, Default)]
pub struct JanitorStatus {
    pub passes: u64,
    pub consecutive_failed_passes: u32,
    pub last_success: Option<Instant>,
    pub cold_destroyed_total: u64,
    pub hot_killed_total: u64,
    pub permanent_recreated_total: u64,
}

/// Background reclaimer for the tiered pool. Each pass destroys Cold
/// handles idle past the hard ceiling, force-kills Hot handles failing
/// their liveness probe, and synchronously recreates the Permanent
/// handle when its probe fails. Per-handle failures never abort the
/// remainder of a pass.
pub struct Janitor {
    pool: Arc<PoolManager>,
    config: JanitorConfig,
    events_tx: mpsc::UnboundedSender<JanitorEvent>,
    status_tx: watch::Sender<JanitorStatus>,
}

impl Janitor {
    pub fn new(
        pool: Arc<PoolManager>,
        config: JanitorConfig,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<JanitorEvent>,
        watch::Receiver<JanitorStatus>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(JanitorStatus::default());
        (
            Self {
                pool,
                config,
                events_tx,
                status_tx,
            },
            events_rx,
            status_rx,
        )
    }

    pub fn status(&self) -> watch::Receiver<JanitorStatus> {
        self.status_tx.subscribe()
    }

    /// Run on a fixed interval until the shutdown signal fires.
    pub fn spawn(self, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let mut tick = interval(self.config.interval());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        self.run_pass().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Janitor shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// One reclamation pass. Returns true when the pass completed
    /// without a pool-level failure.
    pub async fn run_pass(&self) -> bool {
        let mut succeeded = true;
        let mut cold_destroyed = 0u64;
        let mut hot_killed = 0u64;
        let mut permanent_recreated = 0u64;

        // 1. Idle Hot handles shrink into the Cold tier.
        match self
            .pool
            .demote_idle_hot(self.pool.config().hot_idle_threshold())
            .await
        {
            Ok(demoted) if demoted > 0 => debug!("Demoted {} idle hot handle(s)", demoted),
            Ok(_) => {}
            Err(e) => {
                warn!("Hot tier demotion failed: {}", e);
                succeeded = false;
            }
        }

        // 2. Cold handles past the hard ceiling are destroy-only.
        match self
            .pool
            .take_expired_cold(self.pool.config().cold_max_idle())
            .await
        {
            Ok(expired) => {
                for handle in expired {
                    handle.resource.destroy().await;
                    cold_destroyed += 1;
                    self.emit(JanitorEvent::new(handle.id, JanitorAction::ColdExpired));
                }
            }
            Err(e) => {
                warn!("Cold tier sweep failed: {}", e);
                succeeded = false;
            }
        }

        // 3. Probe Hot and Permanent outside the pool lock.
        let targets = match self.pool.probe_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!("Probe snapshot failed: {}", e);
                self.publish_status(false, cold_destroyed, hot_killed, permanent_recreated);
                return false;
            }
        };

        for target in targets {
            if target.resource.probe().await {
                continue;
            }
            match target.tier {
                Tier::Hot => match self.pool.remove_hot(target.id).await {
                    Ok(Some(handle)) => {
                        warn!("Force-killing unresponsive hot handle {}", handle.id);
                        handle.resource.destroy().await;
                        hot_killed += 1;
                        self.emit(JanitorEvent::new(handle.id, JanitorAction::HotKilled));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Failed to remove hot handle {}: {}", target.id, e);
                        succeeded = false;
                    }
                },
                Tier::Permanent => {
                    // Healthy state depends on the Permanent handle
                    // existing, so the recreate happens synchronously
                    // within this pass.
                    match self.pool.recreate_permanent().await {
                        Ok(new_id) => {
                            info!(
                                "Permanent handle {} recreated as {}",
                                target.id, new_id
                            );
                            permanent_recreated += 1;
                            self.emit(JanitorEvent::new(
                                target.id,
                                JanitorAction::PermanentRecreated,
                            ));
                        }
                        Err(e) => {
                            error!("Permanent handle recreate failed: {}", e);
                            succeeded = false;
                        }
                    }
                }
                Tier::Cold => {}
            }
        }

        self.publish_status(succeeded, cold_destroyed, hot_killed, permanent_recreated);
        succeeded
    }

    fn emit(&self, event: JanitorEvent) {
        // The receiver dropping only loses monitoring mirroring.
        let _ = self.events_tx.send(event);
    }

    fn publish_status(
        &self,
        succeeded: bool,
        cold_destroyed: u64,
        hot_killed: u64,
        permanent_recreated: u64,
    ) {
        self.status_tx.send_modify(|status| {
            status.passes += 1;
            status.cold_destroyed_total += cold_destroyed;
            status.hot_killed_total += hot_killed;
            status.permanent_recreated_total += permanent_recreated;
            if succeeded {
                status.consecutive_failed_passes = 0;
                status.last_success = Some(Instant::now());
            } else {
                status.consecutive_failed_passes += 1;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubDriver;
    use fleet_core::PoolConfig;
    use std::time::Duration;

    fn config() -> (PoolConfig, JanitorConfig) {
        (
            PoolConfig {
                max_hot: 3,
                acquire_timeout_ms: 200,
                lock_timeout_ms: 500,
                hot_idle_threshold_seconds: 3_600,
                cold_max_idle_seconds: 0,
                cold_high_water: 8,
            },
            JanitorConfig {
                interval_seconds: 60,
                missed_pass_threshold: 3,
            },
        )
    }

    #[tokio::test]
    async fn expired_cold_handles_are_destroyed_with_events() {
        let (pool_config, janitor_config) = config();
        let driver = Arc::new(StubDriver::new());
        let pool = PoolManager::new(driver.clone(), pool_config);
        pool.warm_permanent().await.unwrap();

        // Manufacture a cold handle.
        let permanent = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let hot = pool.acquire(Duration::from_millis(100)).await.unwrap();
        hot.release().await;
        pool.demote_idle_hot(Duration::ZERO).await.unwrap();
        permanent.release().await;

        let (janitor, mut events_rx, status_rx) = Janitor::new(Arc::clone(&pool), janitor_config);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(janitor.run_pass().await);

        let event = events_rx.recv().await.unwrap();
        assert_eq!(event.action, JanitorAction::ColdExpired);
        assert_eq!(pool.stats().await.unwrap().cold_total, 0);
        assert_eq!(status_rx.borrow().cold_destroyed_total, 1);
        assert_eq!(status_rx.borrow().consecutive_failed_passes, 0);
    }

    #[tokio::test]
    async fn unresponsive_hot_handle_is_force_killed() {
        let (pool_config, janitor_config) = config();
        let driver = Arc::new(StubDriver::new());
        let pool = PoolManager::new(driver.clone(), pool_config);
        pool.warm_permanent().await.unwrap();

        let permanent = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let hot = pool.acquire(Duration::from_millis(100)).await.unwrap();
        hot.release().await;
        permanent.release().await;

        // Kill the hot handle's underlying process (index 1: the
        // permanent was created first).
        let resources = driver.created_resources().await;
        resources[1].kill();

        let (janitor, mut events_rx, _status) = Janitor::new(Arc::clone(&pool), janitor_config);
        assert!(janitor.run_pass().await);

        let event = events_rx.recv().await.unwrap();
        assert_eq!(event.action, JanitorAction::HotKilled);
        assert_eq!(pool.stats().await.unwrap().hot_total, 0);
        assert!(resources[1].is_destroyed());
    }

    #[tokio::test]
    async fn failed_permanent_probe_triggers_synchronous_recreate() {
        let (pool_config, janitor_config) = config();
        let driver = Arc::new(StubDriver::new());
        let pool = PoolManager::new(driver.clone(), pool_config);
        pool.warm_permanent().await.unwrap();

        let resources = driver.created_resources().await;
        resources[0].kill();

        let (janitor, mut events_rx, _status) = Janitor::new(Arc::clone(&pool), janitor_config);
        assert!(janitor.run_pass().await);

        // The Permanent slot is still warmed when the pass completes.
        let stats = pool.stats().await.unwrap();
        assert!(stats.permanent_warmed);
        assert_eq!(stats.created_total, 2);

        let event = events_rx.recv().await.unwrap();
        assert_eq!(event.action, JanitorAction::PermanentRecreated);
        assert!(resources[0].is_destroyed());
    }

    #[tokio::test]
    async fn recreate_failure_marks_pass_failed_but_keeps_old_handle() {
        let (pool_config, janitor_config) = config();
        let driver = Arc::new(StubDriver::new());
        let pool = PoolManager::new(driver.clone(), pool_config);
        pool.warm_permanent().await.unwrap();

        let resources = driver.created_resources().await;
        resources[0].kill();
        driver.set_fail_creates(true);

        let (janitor, _events_rx, status_rx) = Janitor::new(Arc::clone(&pool), janitor_config);
        assert!(!janitor.run_pass().await);
        assert_eq!(status_rx.borrow().consecutive_failed_passes, 1);

        // Recreate creates before swapping: on failure the old handle
        // remains in the slot rather than leaving it empty.
        assert!(pool.stats().await.unwrap().permanent_warmed);

        // Recovery clears the failure streak.
        driver.set_fail_creates(false);
        assert!(janitor.run_pass().await);
        assert_eq!(status_rx.borrow().consecutive_failed_passes, 0);
    }
}
