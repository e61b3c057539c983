use std::fmt;

use fleet_core::{FleetError, FleetResult};
use serde::{Deserialize, Serialize};

/// Worker lifecycle states.
///
/// Healthy means the Permanent handle is warmed and the first heartbeat
/// was attempted; Running begins with the first accepted request.
/// Unhealthy is recoverable (back to Running); Failed and Stopped admit
/// no further requests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerState {
    #[serde(rename = "NOT_RUNNING")]
    NotRunning,
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "HEALTHY")]
    Healthy,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "UNHEALTHY")]
    Unhealthy,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "STOPPED")]
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::NotRunning => "NOT_RUNNING",
            WorkerState::Starting => "STARTING",
            WorkerState::Healthy => "HEALTHY",
            WorkerState::Running => "RUNNING",
            WorkerState::Unhealthy => "UNHEALTHY",
            WorkerState::Failed => "FAILED",
            WorkerState::Stopped => "STOPPED",
        };
        write!(f, "{name}")
    }
}

impl WorkerState {
    /// Whether this worker may admit new requests.
    pub fn admits_requests(self) -> bool {
        matches!(
            self,
            WorkerState::Healthy | WorkerState::Running | WorkerState::Unhealthy
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped)
    }

    /// Allowed lifecycle transitions. Stopped is reachable from every
    /// state on explicit shutdown; Failed from every live state on a
    /// fatal persistence error.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        if self == next {
            return false;
        }
        match (self, next) {
            (_, Stopped) => !self.is_terminal(),
            (NotRunning, Starting) => true,
            (Starting, Healthy) | (Starting, Failed) => true,
            (Healthy, Running) | (Healthy, Unhealthy) | (Healthy, Failed) => true,
            (Running, Unhealthy) | (Running, Failed) => true,
            (Unhealthy, Running) | (Unhealthy, Failed) => true,
            _ => false,
        }
    }

    pub fn checked_transition(self, next: WorkerState) -> FleetResult<WorkerState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(FleetError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}
