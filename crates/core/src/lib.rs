//! Shared foundation for the browser fleet worker: error taxonomy,
//! configuration, domain models, coordination-store key layout and the
//! circuit breaker.

pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod keys;
pub mod logging;
pub mod models;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{
    HeartbeatConfig, JanitorConfig, MonitoringConfig, PoolConfig, StoreConfig, WorkerConfig,
};
pub use errors::{FleetError, FleetResult};
pub use models::{
    EndpointStats, ErrorEvent, JanitorAction, JanitorEvent, RequestEvent, RequestOutcome,
    WorkerRecord,
};
