//! Background execution machinery.
//!
//! The orchestrator owns every `Execution` state transition; the worker
//! loop pulls queued work and hands it to the orchestrator under a
//! concurrency limit.

pub mod manager;
pub mod orchestrator;
pub mod worker;

use serde::{Deserialize, Serialize};

pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use worker::{ExecutionTask, WorkerMetrics};

/// Work item flowing from the trigger surfaces to the worker pool.
///
/// Carries identifiers only; the worker loads the full record from the
/// execution store so queued work stays small and replayable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionWork {
    pub execution_id: String,
    pub task_id: String,
}
