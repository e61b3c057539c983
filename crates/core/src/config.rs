use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{FleetError, FleetResult};

/// Tiered pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound for the Hot tier.
    pub max_hot: usize,
    /// Default acquire timeout in milliseconds. Stuck pools must fail
    /// fast rather than cascade into request-thread deadlock.
    pub acquire_timeout_ms: u64,
    /// Bounded wait on the pool mutex itself, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Hot handles idle longer than this are demoted to Cold.
    pub hot_idle_threshold_seconds: u64,
    /// Cold handles idle longer than this hard ceiling are destroyed.
    pub cold_max_idle_seconds: u64,
    /// Cold tier size above which the worker is considered resource
    /// exhausted when the janitor also stops making successful passes.
    pub cold_high_water: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_hot: 5,
            acquire_timeout_ms: 2_000,
            lock_timeout_ms: 1_000,
            hot_idle_threshold_seconds: 300,
            cold_max_idle_seconds: 600,
            cold_high_water: 8,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
    pub fn hot_idle_threshold(&self) -> Duration {
        Duration::from_secs(self.hot_idle_threshold_seconds)
    }
    pub fn cold_max_idle(&self) -> Duration {
        Duration::from_secs(self.cold_max_idle_seconds)
    }

    pub fn validate(&self) -> FleetResult<()> {
        if self.max_hot == 0 {
            return Err(FleetError::config_error("pool.max_hot must be at least 1"));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(FleetError::config_error(
                "pool.acquire_timeout_ms must be positive",
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(FleetError::config_error(
                "pool.lock_timeout_ms must be positive",
            ));
        }
        Ok(())
    }
}

/// Janitor background task configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanitorConfig {
    pub interval_seconds: u64,
    /// Number of janitor intervals without a successful pass after which
    /// a cold tier above its high-water mark marks the worker Unhealthy.
    pub missed_pass_threshold: u32,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            missed_pass_threshold: 3,
        }
    }
}

impl JanitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn validate(&self) -> FleetResult<()> {
        if self.interval_seconds == 0 {
            return Err(FleetError::config_error(
                "janitor.interval_seconds must be positive",
            ));
        }
        Ok(())
    }
}

/// Coordination store connection and retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    pub max_retry_attempts: u32,
    /// First retry backoff in milliseconds; doubled on every attempt.
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_retry_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl StoreConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn validate(&self) -> FleetResult<()> {
        if self.url.is_empty() {
            return Err(FleetError::config_error("store.url must not be empty"));
        }
        if self.max_retry_attempts == 0 {
            return Err(FleetError::config_error(
                "store.max_retry_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Heartbeat publication configuration. The TTL must be strictly greater
/// than the interval so one missed beat is tolerated but not two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub interval_seconds: u64,
    pub ttl_seconds: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            ttl_seconds: 60,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn validate(&self) -> FleetResult<()> {
        if self.ttl_seconds <= self.interval_seconds {
            return Err(FleetError::config_error(
                "heartbeat.ttl_seconds must be strictly greater than interval_seconds",
            ));
        }
        Ok(())
    }
}

/// Monitoring aggregator configuration: local ring size, flush cadence
/// and the TTL for each mirrored key category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub ring_capacity: usize,
    pub flush_interval_seconds: u64,
    pub active_ttl_seconds: u64,
    pub completed_ttl_seconds: u64,
    pub janitor_ttl_seconds: u64,
    pub errors_ttl_seconds: u64,
    pub aggregate_ttl_seconds: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1024,
            flush_interval_seconds: 60,
            active_ttl_seconds: 300,
            completed_ttl_seconds: 3_600,
            janitor_ttl_seconds: 3_600,
            errors_ttl_seconds: 3_600,
            aggregate_ttl_seconds: 86_400,
        }
    }
}

impl MonitoringConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }

    pub fn validate(&self) -> FleetResult<()> {
        if self.ring_capacity == 0 {
            return Err(FleetError::config_error(
                "monitoring.ring_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Top-level worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkerConfig {
    /// Worker id; generated from a v4 uuid when absent.
    pub worker_id: Option<String>,
    /// Durable state record location.
    pub state_file: Option<PathBuf>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl WorkerConfig {
    /// Load configuration from a TOML file, then apply environment
    /// overrides (`FLEET_STORE_URL` wins over the file value).
    pub fn from_file<P: AsRef<Path>>(path: P) -> FleetResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            FleetError::config_error(format!(
                "failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let mut config: WorkerConfig = toml::from_str(&content)
            .map_err(|e| FleetError::config_error(format!("invalid config file: {e}")))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("FLEET_STORE_URL") {
            if !url.is_empty() {
                self.store.url = url;
            }
        }
    }

    pub fn validate(&self) -> FleetResult<()> {
        self.pool.validate()?;
        self.janitor.validate()?;
        self.store.validate()?;
        self.heartbeat.validate()?;
        self.monitoring.validate()?;
        Ok(())
    }
}
