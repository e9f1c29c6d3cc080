//! Worker system: queue dispatch and recovery.
//!
//! Core components:
//! - `state`: Queue item state machine (pending → processing → completed/failed)
//! - `scheduler`: Dispatcher: claims batches and runs item processors
//! - `retry`: Retry agent: re-queues transient failures under the cap

pub mod retry;
pub mod scheduler;
pub mod state;

pub use retry::{RetryAgent, spawn_retry_agent};
pub use scheduler::{DispatchOutcome, Dispatcher, spawn_dispatcher};
pub use state::{FailureKind, PipelineStep, QueueStatus, StepStatus};
