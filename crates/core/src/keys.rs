//! Coordination-store key layout.
//!
//! Every worker writes only its own id-scoped keys, so write contention
//! across workers never occurs; only the aggregate read path (the
//! external dashboard) crosses worker boundaries.

/// Set of membership candidates. No TTL; entries are lazily corrected
/// against unexpired heartbeat keys on read.
pub const ACTIVE_WORKERS_SET: &str = "registry:active_workers";

/// Fleet-wide per-endpoint rollup record.
pub const ENDPOINT_AGGREGATE: &str = "stats:endpoint_aggregate";

pub fn heartbeat(worker_id: &str) -> String {
    format!("registry:heartbeat:{worker_id}")
}

pub fn active_requests(worker_id: &str) -> String {
    format!("stats:{worker_id}:active")
}

pub fn completed_requests(worker_id: &str) -> String {
    format!("stats:{worker_id}:completed")
}

pub fn janitor_log(worker_id: &str) -> String {
    format!("stats:{worker_id}:janitor")
}

pub fn error_log(worker_id: &str) -> String {
    format!("stats:{worker_id}:errors")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_id_scoped() {
        assert_eq!(heartbeat("w1"), "registry:heartbeat:w1");
        assert_eq!(active_requests("w1"), "stats:w1:active");
        assert_eq!(completed_requests("w1"), "stats:w1:completed");
        assert_eq!(janitor_log("w1"), "stats:w1:janitor");
        assert_eq!(error_log("w1"), "stats:w1:errors");
    }
}
