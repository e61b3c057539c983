use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Liveness record republished by every worker's heartbeat task.
/// Membership is derived from the unexpired presence of this record,
/// never asserted directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub hostname: String,
    pub last_seen: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn new(worker_id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            hostname: hostname.into(),
            last_seen: Utc::now(),
        }
    }

    /// Refresh `last_seen` for republication.
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

/// Outcome of one request lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestOutcome {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "ERROR")]
    Error,
}

/// One request lifecycle event. Append-only; a request belongs to
/// exactly one worker, so `request_id` is a safe merge key fleet-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEvent {
    pub request_id: Uuid,
    pub endpoint: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: RequestOutcome,
}

impl RequestEvent {
    pub fn started(endpoint: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            started_at: Utc::now(),
            finished_at: None,
            outcome: RequestOutcome::Pending,
        }
    }

    pub fn finish(&mut self, outcome: RequestOutcome) {
        self.finished_at = Some(Utc::now());
        self.outcome = outcome;
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn latency_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// Reclamation action taken by the janitor on one handle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JanitorAction {
    #[serde(rename = "COLD_EXPIRED")]
    ColdExpired,
    #[serde(rename = "HOT_KILLED")]
    HotKilled,
    #[serde(rename = "PERMANENT_RECREATED")]
    PermanentRecreated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanitorEvent {
    pub handle_id: Uuid,
    pub action: JanitorAction,
    pub occurred_at: DateTime<Utc>,
}

impl JanitorEvent {
    pub fn new(handle_id: Uuid, action: JanitorAction) -> Self {
        Self {
            handle_id,
            action,
            occurred_at: Utc::now(),
        }
    }
}

/// Error log entry mirrored into the per-worker errors key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub request_id: Option<Uuid>,
    pub endpoint: Option<String>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            request_id: None,
            endpoint: None,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn for_request(request: &RequestEvent, message: impl Into<String>) -> Self {
        Self {
            request_id: Some(request.request_id),
            endpoint: Some(request.endpoint.clone()),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Latency rollup for one endpoint, recomputed by folding RequestEvents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EndpointStats {
    pub count: u64,
    pub error_count: u64,
    pub total_latency_ms: i64,
    pub min_latency_ms: Option<i64>,
    pub max_latency_ms: Option<i64>,
}

impl EndpointStats {
    pub fn record(&mut self, event: &RequestEvent) {
        self.count += 1;
        if event.outcome == RequestOutcome::Error {
            self.error_count += 1;
        }
        if let Some(latency) = event.latency_ms() {
            self.total_latency_ms += latency;
            self.min_latency_ms = Some(self.min_latency_ms.map_or(latency, |m| m.min(latency)));
            self.max_latency_ms = Some(self.max_latency_ms.map_or(latency, |m| m.max(latency)));
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.count as f64
        }
    }
}
