use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::{FleetError, FleetResult};

/// Circuit breaker state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - calls are short-circuited without transport I/O
    Open,
    /// Circuit is half-open - one trial call probes recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: usize,
    /// Cool-down window while open
    pub cool_down: Duration,
    /// Maximum call duration; a timeout counts as a failure
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(300),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub short_circuited_calls: u64,
    pub last_state_change: Instant,
    /// True while the single half-open trial call is in flight
    pub probe_in_flight: bool,
}

impl CircuitBreakerStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            short_circuited_calls: 0,
            last_state_change: Instant::now(),
            probe_in_flight: false,
        }
    }
}

/// Failure isolation for one class of coordination-store operations.
///
/// An unreachable store must degrade a worker to
/// locally-healthy-but-fleet-invisible, never stall request handling on
/// network timeouts: past `failure_threshold` consecutive failures the
/// circuit opens and every call fails immediately with
/// `StoreUnavailable` until the cool-down elapses, after which exactly
/// one trial call is admitted. A successful trial closes the circuit;
/// a failed one re-opens it for another cool-down.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    stats: Arc<RwLock<CircuitBreakerStats>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            stats: Arc::new(RwLock::new(CircuitBreakerStats::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation under circuit breaker protection.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> FleetResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = FleetResult<T>>,
    {
        if !self.try_acquire_call().await {
            let mut stats = self.stats.write().await;
            stats.short_circuited_calls += 1;
            return Err(FleetError::store_unavailable(format!(
                "circuit breaker '{}' is open",
                self.name
            )));
        }

        let result = tokio::time::timeout(self.config.call_timeout, operation()).await;

        match result {
            Ok(Ok(value)) => {
                self.record_success().await;
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record_failure().await;
                Err(error)
            }
            Err(_) => {
                self.record_failure().await;
                Err(FleetError::store_unavailable(format!(
                    "operation on '{}' timed out after {:?}",
                    self.name, self.config.call_timeout
                )))
            }
        }
    }

    /// Decide whether a call may proceed, transitioning Open -> HalfOpen
    /// once the cool-down has elapsed. In HalfOpen only the single probe
    /// call is admitted; concurrent callers are short-circuited. A trial
    /// that never resolves (its future was dropped) forfeits the permit
    /// after another cool-down.
    async fn try_acquire_call(&self) -> bool {
        let mut stats = self.stats.write().await;
        match stats.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if stats.last_state_change.elapsed() >= self.config.cool_down {
                    tracing::info!(
                        "Circuit breaker '{}' cool-down elapsed, half-opening for probe",
                        self.name
                    );
                    stats.state = CircuitState::HalfOpen;
                    stats.last_state_change = Instant::now();
                    stats.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if !stats.probe_in_flight {
                    stats.probe_in_flight = true;
                    true
                } else if stats.last_state_change.elapsed() >= self.config.cool_down {
                    // The trial call was abandoned (its future dropped
                    // before completing, so neither success nor failure
                    // was recorded). Admit a fresh trial rather than
                    // short-circuiting forever.
                    tracing::info!(
                        "Circuit breaker '{}' trial call abandoned, admitting a new probe",
                        self.name
                    );
                    stats.last_state_change = Instant::now();
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut stats = self.stats.write().await;
        stats.total_calls += 1;
        stats.successful_calls += 1;
        stats.consecutive_failures = 0;
        stats.probe_in_flight = false;

        if stats.state != CircuitState::Closed {
            tracing::info!("Circuit breaker '{}' closed after successful probe", self.name);
            stats.state = CircuitState::Closed;
            stats.last_state_change = Instant::now();
        }
    }

    async fn record_failure(&self) {
        let mut stats = self.stats.write().await;
        stats.total_calls += 1;
        stats.failed_calls += 1;
        stats.consecutive_failures += 1;
        stats.probe_in_flight = false;

        match stats.state {
            CircuitState::Closed => {
                if stats.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        "Circuit breaker '{}' opened after {} consecutive failures",
                        self.name,
                        stats.consecutive_failures
                    );
                    stats.state = CircuitState::Open;
                    stats.last_state_change = Instant::now();
                }
            }
            CircuitState::HalfOpen => {
                // A failed probe immediately re-opens for another cool-down.
                tracing::warn!("Circuit breaker '{}' re-opened: probe failed", self.name);
                stats.state = CircuitState::Open;
                stats.last_state_change = Instant::now();
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.stats.read().await.state.clone()
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        self.stats.read().await.clone()
    }

    /// Reset to closed state (for tests and manual recovery).
    pub async fn reset(&self) {
        let mut stats = self.stats.write().await;
        *stats = CircuitBreakerStats::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            cool_down: Duration::from_millis(100),
            call_timeout: Duration::from_secs(1),
        }
    }

    async fn fail(cb: &CircuitBreaker) {
        let _: FleetResult<()> = cb
            .execute(|| async { Err(FleetError::store_unavailable("boom")) })
            .await;
    }

    #[tokio::test]
    async fn stays_closed_on_success() {
        let cb = CircuitBreaker::new("reads");
        let result = cb.execute(|| async { Ok::<_, FleetError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_five_consecutive_failures() {
        let cb = CircuitBreaker::with_config("writes", fast_config());

        for _ in 0..4 {
            fail(&cb).await;
            assert_eq!(cb.state().await, CircuitState::Closed);
        }
        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_without_io() {
        let cb = CircuitBreaker::with_config("writes", fast_config());
        for _ in 0..5 {
            fail(&cb).await;
        }

        // The operation closure must never run while open.
        let mut ran = false;
        let result = cb
            .execute(|| {
                ran = true;
                async { Ok::<_, FleetError>(()) }
            })
            .await;
        assert!(matches!(result, Err(FleetError::StoreUnavailable(_))));
        assert!(!ran);
        assert_eq!(cb.stats().await.short_circuited_calls, 1);
    }

    #[tokio::test]
    async fn successful_probe_closes_after_cool_down() {
        let cb = CircuitBreaker::with_config("sets", fast_config());
        for _ in 0..5 {
            fail(&cb).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let result = cb.execute(|| async { Ok::<_, FleetError>("pong") }).await;
        assert_eq!(result.unwrap(), "pong");
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens() {
        let cb = CircuitBreaker::with_config("reads", fast_config());
        for _ in 0..5 {
            fail(&cb).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        // Still short-circuiting inside the fresh cool-down.
        let result = cb.execute(|| async { Ok::<_, FleetError>(()) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn abandoned_trial_call_does_not_strand_the_breaker() {
        let cb = Arc::new(CircuitBreaker::with_config("reads", fast_config()));
        for _ in 0..5 {
            fail(&cb).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        // The half-open trial call is dropped mid-flight, as when the
        // task driving it is cancelled at shutdown. Neither success nor
        // failure is ever recorded for it.
        let trial = {
            let cb = Arc::clone(&cb);
            tokio::spawn(async move {
                let _: FleetResult<()> = cb
                    .execute(|| async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        trial.abort();
        let _ = trial.await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        // Inside the cool-down the permit is still held.
        let held = cb.execute(|| async { Ok::<_, FleetError>(()) }).await;
        assert!(held.is_err());

        // After another cool-down a fresh trial is admitted and closes
        // the circuit.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let result = cb.execute(|| async { Ok::<_, FleetError>("pong") }).await;
        assert_eq!(result.unwrap(), "pong");
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let config = CircuitBreakerConfig {
            call_timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let cb = CircuitBreaker::with_config("reads", config);

        let result = cb
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, FleetError>(())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(cb.stats().await.consecutive_failures, 1);
    }
}
