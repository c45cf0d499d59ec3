//! Batching Scheduler: groups concurrent embedding requests per model.

pub mod request;
pub mod scheduler;

pub use request::{InferenceRequest, Priority};
pub use scheduler::{BatchPolicy, BatchScheduler};
