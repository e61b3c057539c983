//! Coordination-store client stack: transport trait, Redis and
//! in-memory backends, the retrying/breaker-guarded client, and the
//! heartbeat, discovery and monitoring layers built on top of it.

pub mod client;
pub mod discovery;
pub mod heartbeat;
pub mod memory_store;
pub mod monitoring;
pub mod redis_store;
pub mod store;

pub use client::StoreClient;
pub use discovery::WorkerDiscovery;
pub use heartbeat::HeartbeatPublisher;
pub use memory_store::MemoryStore;
pub use monitoring::MonitoringRecorder;
pub use redis_store::RedisStore;
pub use store::CoordinationStore;
