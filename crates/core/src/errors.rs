use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("browser pool exhausted: no free handle within {waited:?}")]
    PoolTimeout { waited: Duration },
    #[error("resource handle unhealthy: {0}")]
    ResourceUnhealthy(String),
    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("worker state record corrupt: {0}")]
    StateCorrupt(String),
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type FleetResult<T> = Result<T, FleetError>;

impl FleetError {
    pub fn pool_timeout(waited: Duration) -> Self {
        Self::PoolTimeout { waited }
    }
    pub fn resource_unhealthy<S: Into<String>>(msg: S) -> Self {
        Self::ResourceUnhealthy(msg.into())
    }
    pub fn store_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StoreUnavailable(msg.into())
    }
    pub fn state_corrupt<S: Into<String>>(msg: S) -> Self {
        Self::StateCorrupt(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Transient errors the caller may retry (or the external router may
    /// redirect elsewhere). `PoolTimeout` is deliberately distinguishable
    /// from `Internal` so pool exhaustion surfaces as service-busy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FleetError::PoolTimeout { .. }
                | FleetError::ResourceUnhealthy(_)
                | FleetError::StoreUnavailable(_)
                | FleetError::Timeout(_)
        )
    }

    /// Fatal errors halt new admissions and drive the worker to Failed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FleetError::StateCorrupt(_) | FleetError::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for FleetError {
    fn from(err: anyhow::Error) -> Self {
        FleetError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_retryable_not_fatal() {
        let err = FleetError::pool_timeout(Duration::from_secs(2));
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn state_corrupt_is_fatal() {
        let err = FleetError::state_corrupt("truncated record");
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_unavailable_degrades_but_retries() {
        let err = FleetError::store_unavailable("connection refused");
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }
}
