//! Worker composition: lifecycle state machine, crash-safe durable
//! state record and the service facade tying the pool, janitor,
//! heartbeat and monitoring together.

pub mod lifecycle;
pub mod service;
pub mod state_store;

pub use lifecycle::WorkerState;
pub use service::WorkerService;
pub use state_store::{StateRecord, StateStore};
